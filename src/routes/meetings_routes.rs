use crate::error::ApiError;
use crate::meetings::MeetingStore;
use crate::models::{CreateMeeting, Meeting, UpdateMeeting};
use rocket::serde::json::Json;
use rocket::{delete, get, patch, post, State};

#[get("/api/meetings")]
pub fn list_meetings(meetings: &State<MeetingStore>) -> Json<Vec<Meeting>> {
    Json(meetings.list())
}

#[post("/api/meetings", format = "json", data = "<body>")]
pub fn create_meeting(
    meetings: &State<MeetingStore>,
    body: Json<CreateMeeting>,
) -> Result<Json<Meeting>, ApiError> {
    meetings.create(body.into_inner()).map(Json)
}

#[get("/api/meetings/<id>")]
pub fn get_meeting(meetings: &State<MeetingStore>, id: &str) -> Result<Json<Meeting>, ApiError> {
    meetings
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Meeting {id} not found")))
}

#[patch("/api/meetings/<id>", format = "json", data = "<body>")]
pub fn update_meeting(
    meetings: &State<MeetingStore>,
    id: &str,
    body: Json<UpdateMeeting>,
) -> Result<Json<Meeting>, ApiError> {
    meetings.update(id, body.into_inner()).map(Json)
}

#[delete("/api/meetings/<id>")]
pub fn delete_meeting(
    meetings: &State<MeetingStore>,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiError> {
    let meeting = meetings.delete(id)?;
    Ok(Json(serde_json::json!({ "deleted": true, "meeting": meeting })))
}
