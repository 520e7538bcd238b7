use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

const REDACTED: &str = "***";

/// `GET /api/v1/config` - the running configuration with API keys masked.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": redacted_config(state.get_config())?
    })))
}

fn redacted_config(config: &AppConfig) -> Result<serde_json::Value, AppError> {
    let mut config = config.clone();
    for key in [
        &mut config.providers.stt.api_key,
        &mut config.providers.llm.api_key,
        &mut config.providers.tts.api_key,
    ] {
        if key.is_some() {
            *key = Some(REDACTED.to_string());
        }
    }
    serde_json::to_value(&config).map_err(|e| AppError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state_with, FakeRoomConnector};
    use actix_web::{test, App};

    #[::core::prelude::v1::test]
    fn test_keys_are_masked() {
        let mut config = AppConfig::default();
        config.providers.llm.api_key = Some("gsk_secret".to_string());

        let value = redacted_config(&config).unwrap();
        assert_eq!(value["providers"]["llm"]["api_key"], REDACTED);
        assert!(value["providers"]["stt"]["api_key"].is_null());
        assert!(!value.to_string().contains("gsk_secret"));
    }

    #[actix_web::test]
    async fn test_config_endpoint() {
        let mut config = AppConfig::default();
        config.providers.tts.api_key = Some("xi_secret".to_string());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state_with(config, FakeRoomConnector::new())))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/config").to_request()).await;
        assert_eq!(body["config"]["providers"]["tts"]["api_key"], REDACTED);
        assert_eq!(body["config"]["room"]["agent_track_name"], "agent-tts-output");
    }
}
