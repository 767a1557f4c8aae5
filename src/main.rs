use std::sync::Arc;

use novel_session::configuration::get_configuration;
use novel_session::telemetry::init_telemetry;
use novel_session::{
    ApiClient, Event, EventBus, EventKind, FileStorage, MemoryStorage, Navigator, SessionStorage,
    SessionStore,
};

const USAGE: &str = "usage: novel_session login <username> <password> | get <path> | logout | whoami";

fn io_error(kind: std::io::ErrorKind, message: impl Into<String>) -> std::io::Error {
    std::io::Error::new(kind, message.into())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!(base_url = %config.api.base_url, "Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(io_error(std::io::ErrorKind::InvalidInput, "Configuration error"));
        }
    };

    let storage: Arc<dyn SessionStorage> = match &configuration.session.storage_path {
        Some(path) => {
            let storage = FileStorage::open(path).map_err(|e| {
                tracing::error!(path = %path.display(), "Failed to open session storage: {}", e);
                io_error(std::io::ErrorKind::InvalidData, "Session storage error")
            })?;
            tracing::info!(path = %storage.path().display(), "Session storage opened");
            Arc::new(storage)
        }
        None => {
            tracing::info!("No storage path configured, keeping session in memory");
            Arc::new(MemoryStorage::new())
        }
    };

    let events = EventBus::new();
    events.subscribe(EventKind::SessionExpiredAlert, |event| {
        if let Event::SessionExpiredAlert(alert) = event {
            eprintln!("{}: {}", alert.title, alert.message);
        }
    });

    let navigator: Arc<dyn Navigator> = Arc::new(|route: &str| {
        tracing::info!(route = route, "Navigation requested");
    });
    let session = Arc::new(SessionStore::restore(
        storage,
        navigator,
        configuration.session.login_route.clone(),
    ));
    session.listen(&events);

    let client = ApiClient::new(&configuration.api, session, events).map_err(|e| {
        tracing::error!("Failed to build HTTP client: {}", e);
        io_error(std::io::ErrorKind::Other, "HTTP client error")
    })?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["login", username, password] => {
            let identity = client
                .login(username, password, true)
                .await
                .map_err(|e| io_error(std::io::ErrorKind::PermissionDenied, e.to_string()))?;
            println!("Signed in as {} ({})", identity.username(), identity.role().as_str());
        }
        ["get", path] => {
            let body: serde_json::Value = client
                .get_json(path)
                .await
                .map_err(|e| io_error(std::io::ErrorKind::Other, e.to_string()))?;
            let pretty = serde_json::to_string_pretty(&body)
                .map_err(|e| io_error(std::io::ErrorKind::InvalidData, e.to_string()))?;
            println!("{}", pretty);
        }
        ["logout"] => client.session().logout(),
        ["whoami"] => match client.session().identity() {
            Some(identity) => println!(
                "{} (id {}, {})",
                identity.username(),
                identity.user_id(),
                identity.role().as_str()
            ),
            None => println!("Not signed in"),
        },
        _ => {
            eprintln!("{}", USAGE);
            return Err(io_error(std::io::ErrorKind::InvalidInput, "Unknown command"));
        }
    }

    Ok(())
}
