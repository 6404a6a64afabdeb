use rocket::http::Method;
use rocket_cors::{AllowedHeaders, AllowedOrigins, Cors, CorsOptions};
use tracing::debug;

use crate::{ServerError, config::LobbyConfig};

/// Cross-origin access to the lobby's HTTP endpoints.
pub fn create_cors(config: &LobbyConfig) -> Result<Cors, ServerError> {
    let origins: Vec<&str> = config
        .allowed_origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .collect();
    debug!("Allowing cross-origin requests from {:?}", origins);

    let allowed_origins = if origins.contains(&"*") {
        AllowedOrigins::all()
    } else {
        AllowedOrigins::some_exact(&origins)
    };

    let cors = CorsOptions {
        allowed_origins,
        allowed_methods: [Method::Get, Method::Options]
            .into_iter()
            .map(From::from)
            .collect(),
        allowed_headers: AllowedHeaders::some(&["Accept", "Content-Type", "User-Name"]),
        allow_credentials: false,
        ..Default::default()
    }
    .to_cors()?;

    Ok(cors)
}
