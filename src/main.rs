#[rocket::launch]
fn rocket() -> _ {
    ai_maestro::rocket()
}
