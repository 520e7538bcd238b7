use crate::config::AppConfig;
use crate::metrics::LatencyMetric;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let active_sessions = state.sessions.active_count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "active_sessions": active_sessions
        },
        "memory": get_memory_info(),
        "providers": {
            "stt": config.providers.stt.provider,
            "llm": config.providers.llm.provider,
            "tts": config.providers.tts.provider
        },
        "system": get_system_status(config, active_sessions)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    let summaries = state.sessions.all_metrics();
    let turns: u64 = summaries.iter().map(|s| s.turns).sum();
    let interruptions: u64 = summaries.iter().map(|s| s.interruptions).sum();
    let latency_averages: serde_json::Map<String, serde_json::Value> = LatencyMetric::ALL
        .iter()
        .map(|metric| {
            let samples: Vec<f64> = summaries
                .iter()
                .filter_map(|s| s.stats(*metric))
                .flat_map(|stats| stats.samples_ms.iter().copied())
                .collect();
            let average = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };
            (metric.as_str().to_string(), json!(average))
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "sessions": {
            "active": state.sessions.active_count(),
            "registered": summaries.len(),
            "max_concurrent": state.sessions.max_sessions(),
            "turns": turns,
            "interruptions": interruptions,
            "latency_average_ms": latency_averages
        },
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let read_kb = |prefix: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(prefix))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .unwrap_or(0)
                    * 1024
            };

            return json!({
                "resident_memory_bytes": read_kb("VmRSS:"),
                "virtual_memory_bytes": read_kb("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": "Memory info not available on this platform"
    })
}

fn get_system_status(config: &AppConfig, active_sessions: usize) -> serde_json::Value {
    let max_sessions = config.performance.max_concurrent_sessions;
    let session_usage = if max_sessions > 0 {
        active_sessions as f64 / max_sessions as f64
    } else {
        0.0
    };

    let status = if session_usage > 0.9 {
        "high_load"
    } else if session_usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max_sessions,
        "current_sessions": active_sessions,
        "load_warnings": if session_usage > 0.8 {
            vec!["High session usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::app_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_sessions_and_providers() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(app_state()))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["metrics"]["active_sessions"], 0);
        assert_eq!(body["providers"]["llm"], "simulated");
        assert_eq!(body["system"]["status"], "normal");
    }

    #[::core::prelude::v1::test]
    fn test_system_status_thresholds() {
        let config = AppConfig::default();
        assert_eq!(get_system_status(&config, 0)["status"], "normal");
        assert_eq!(get_system_status(&config, 8)["status"], "moderate_load");
        assert_eq!(get_system_status(&config, 10)["status"], "high_load");
    }
}
