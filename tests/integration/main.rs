mod common;

mod agents;
mod federation;
mod keys;
mod meetings;
mod mesh;
mod messages;
mod relay;
mod webhooks;
