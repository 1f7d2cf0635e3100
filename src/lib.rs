pub mod aggregator;
pub mod amp;
pub mod config;
pub mod error;
pub mod events;
pub mod hosts;
pub mod keys;
pub mod mailbox;
pub mod mdns;
pub mod meetings;
pub mod mesh;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod session;
pub mod store;
pub mod webhooks;

use aggregator::Aggregator;
use amp::auth::AuthStore;
use amp::federation::FederationLog;
use config::Config;
use events::EventBus;
use hosts::HostsStore;
use keys::KeyStore;
use mailbox::Mailbox;
use meetings::MeetingStore;
use mesh::PropagationSet;
use rate_limit::{RateLimitConfig, RateLimiter};
use registry::Registry;
use relay::RelayQueue;
use rocket_cors::CorsOptions;
use session::SessionSupervisor;
use std::env;
use std::sync::Arc;
use webhooks::WebhookStore;

/// Shared outbound HTTP client for mesh calls, aggregation and probes.
/// Individual calls wrap their own timeouts; the client itself stays
/// timeout-free so long forwards aren't cut short by short probes.
pub struct HttpClient(pub reqwest::Client);

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::from_env())
}

/// Build against an explicit data directory (used by the test suite).
pub fn rocket_with_data_dir(data_dir: &str) -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::with_data_dir(data_dir))
}

pub fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    std::fs::create_dir_all(&config.data_dir).ok();
    let data_dir = config.data_dir.clone();

    let hosts_store = HostsStore::new(&data_dir);
    hosts_store.seed_self(&config);

    let registry = Registry::new(&data_dir);
    let key_store = KeyStore::new(&data_dir);
    let auth = AuthStore::new(&data_dir);
    let relay = RelayQueue::new(&data_dir);
    let mailbox = Mailbox::new(&data_dir);
    let meetings = MeetingStore::new(&data_dir);
    let supervisor = SessionSupervisor::new(&data_dir, config.idle_threshold_secs);
    let propagation = PropagationSet::new(&data_dir);
    let federation_log = FederationLog::new(&data_dir);
    let aggregator = Aggregator::new(&data_dir);
    let webhook_store = Arc::new(WebhookStore::new(&data_dir));
    let events = EventBus::new();
    let rate_limit_config = RateLimitConfig::from_env();
    let rate_limiter = RateLimiter::new();
    let http_client = HttpClient(
        reqwest::Client::builder()
            .build()
            .expect("Failed to create HTTP client"),
    );

    // Subscribe webhook dispatcher BEFORE handing the EventBus to Rocket
    let webhook_receiver = events.sender.subscribe();
    let dispatcher_store = webhook_store.clone();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    // 10 MiB JSON limit: the route path enforces its own 1 MiB payload cap,
    // but envelopes ride inside a larger body.
    let figment = rocket::Config::figment().merge(("limits.json", 10 * 1024 * 1024));

    let mdns_port = config.port;
    let self_host_id = hosts_store
        .get_self_host()
        .map(|h| h.id)
        .unwrap_or_default();

    rocket::custom(figment)
        .manage(config)
        .manage(hosts_store)
        .manage(registry)
        .manage(key_store)
        .manage(auth)
        .manage(relay)
        .manage(mailbox)
        .manage(meetings)
        .manage(supervisor)
        .manage(propagation)
        .manage(federation_log)
        .manage(aggregator)
        .manage(webhook_store)
        .manage(events)
        .manage(rate_limit_config)
        .manage(rate_limiter)
        .manage(http_client)
        .attach(cors)
        .register(
            "/",
            rocket::catchers![
                routes::not_found,
                routes::too_many_requests,
                routes::unprocessable,
                routes::bad_request,
            ],
        )
        .mount(
            "/",
            rocket::routes![
                // system
                routes::api_config,
                routes::api_sessions,
                routes::status_stream,
                // agents & sessions
                routes::list_agents,
                routes::create_agent,
                routes::search_agents,
                routes::agent_lookup,
                routes::get_agent,
                routes::update_agent,
                routes::delete_agent,
                routes::link_session,
                routes::get_session_status,
                routes::send_session_command,
                routes::delete_session,
                // messages
                routes::get_messages,
                routes::compose_message,
                routes::patch_message,
                routes::delete_message,
                routes::forward_message,
                routes::meeting_messages,
                // meetings
                routes::list_meetings,
                routes::create_meeting,
                routes::get_meeting,
                routes::update_meeting,
                routes::delete_meeting,
                // hosts & mesh
                routes::list_hosts,
                routes::add_host,
                routes::update_host,
                routes::delete_host,
                routes::hosts_identity,
                routes::host_health,
                routes::sync_post,
                routes::sync_get,
                routes::register_peer_route,
                routes::exchange_peers_route,
                routes::set_organization,
                // AMP
                routes::amp_health,
                routes::amp_info,
                routes::amp_register,
                routes::amp_route,
                routes::list_pending,
                routes::delete_pending,
                routes::batch_ack_pending,
                routes::read_receipt,
                routes::amp_list_agents,
                routes::amp_me,
                routes::amp_me_update,
                routes::amp_me_delete,
                routes::amp_resolve,
                routes::revoke_key,
                routes::rotate_key,
                routes::rotate_keys,
                routes::federation_deliver,
                // webhooks
                routes::list_webhooks,
                routes::create_webhook,
                routes::get_webhook,
                routes::delete_webhook,
                routes::test_webhook,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Webhook Dispatcher",
            move |_rocket| {
                Box::pin(async move {
                    webhooks::spawn_dispatcher(webhook_receiver, dispatcher_store);
                    println!("🔗 Webhook dispatcher started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "mDNS Advertisement",
            move |_rocket| {
                Box::pin(async move {
                    let mdns_enabled = env::var("MDNS_ENABLED")
                        .map(|v| v != "0" && v.to_lowercase() != "false")
                        .unwrap_or(true);

                    if !mdns_enabled {
                        println!("📡 mDNS advertisement disabled (MDNS_ENABLED=false)");
                        return;
                    }

                    let instance_name = env::var("MDNS_INSTANCE_NAME")
                        .unwrap_or_else(|_| "ai-maestro".to_string());

                    match mdns::start_mdns(mdns_port, &instance_name, &self_host_id) {
                        Ok(handle) => {
                            println!(
                                "📡 mDNS advertising: {} on port {}",
                                handle.fullname(),
                                mdns_port
                            );
                            // Leak the handle to keep mDNS alive for the lifetime of the
                            // server; the OS reclaims resources on process exit.
                            std::mem::forget(handle);
                        }
                        Err(e) => {
                            eprintln!("⚠️  mDNS failed to start: {e} (advertisement disabled, API still works)");
                        }
                    }
                })
            },
        ))
}
