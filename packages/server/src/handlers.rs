//! HTTP handler functions for the eligibility map API.

use actix_web::http::header;
use actix_web::{HttpResponse, web};
use futures::{StreamExt as _, pin_mut};
use gce_map_database::DbError;
use gce_map_database::cancel::run_cancellable;
use gce_map_database::cursor::{BuildingQuery, building_cursor};
use gce_map_database::viewport::{viewport, viewport_clusters, viewport_districts};
use gce_map_database_models::District;
use gce_map_export::csv_stream;
use gce_map_server_models::{ApiError, ApiHealth, ApiMapResponse, ViewportQueryParams};
use gce_map_spatial::mode::{MAX_HEX_ZOOM, MIN_HEX_ZOOM};
use tokio_util::sync::CancellationToken;

use crate::AppState;

/// Download name of a hexagon export.
const HEX_EXPORT_FILENAME: &str = "good-cause-eviction-buildings.csv";

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /api/buildings`
///
/// Raw buildings when zoomed in, precomputed hexagons otherwise.
pub async fn buildings(
    state: web::Data<AppState>,
    params: web::Query<ViewportQueryParams>,
) -> HttpResponse {
    let bbox = params.to_map_view().resolve();
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();

    let result = async {
        let lease = run_cancellable(&token, state.config.connect()).await?;
        viewport(&*lease, &bbox, &token).await
    }
    .await;

    match result {
        Ok(result) => HttpResponse::Ok().json(ApiMapResponse::from(&result)),
        Err(e) => error_response("buildings", &e),
    }
}

/// `GET /api/clusters`
///
/// Live rectangular grid over the buildings in the viewport.
pub async fn clusters(
    state: web::Data<AppState>,
    params: web::Query<ViewportQueryParams>,
) -> HttpResponse {
    let bbox = params.to_map_view().resolve();
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();

    let result = async {
        let lease = run_cancellable(&token, state.config.connect()).await?;
        viewport_clusters(&*lease, &bbox, &token).await
    }
    .await;

    match result {
        Ok(result) => HttpResponse::Ok().json(ApiMapResponse::from(&result)),
        Err(e) => error_response("clusters", &e),
    }
}

/// `GET /api/districts/{kind}`
///
/// District outlines with their eligibility stats. `kind` is one of
/// `assembly-districts`, `city-council-districts`, `congress-districts`,
/// or `state-senate-districts`.
pub async fn districts(
    state: web::Data<AppState>,
    kind: web::Path<String>,
    params: web::Query<ViewportQueryParams>,
) -> HttpResponse {
    let Ok(district) = kind.parse::<District>() else {
        return unknown_district(&kind);
    };
    let bbox = params.to_map_view().resolve();
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();

    let result = async {
        let lease = run_cancellable(&token, state.config.connect()).await?;
        viewport_districts(&*lease, district, &bbox, &token).await
    }
    .await;

    match result {
        Ok(stats) => HttpResponse::Ok().json(ApiMapResponse::districts(&stats)),
        Err(e) => error_response("districts", &e),
    }
}

/// `GET /api/districts/{kind}/{id}/buildings.csv`
pub async fn district_csv(
    state: web::Data<AppState>,
    path: web::Path<(String, i32)>,
) -> HttpResponse {
    let (kind, id) = path.into_inner();
    let Ok(district) = kind.parse::<District>() else {
        return unknown_district(&kind);
    };

    csv_response(
        &state,
        BuildingQuery::District { district, id },
        district.export_filename(),
    )
    .await
}

/// `GET /api/hexes/{zoom}/{longitude}/{latitude}/buildings.csv`
///
/// Buildings inside the hexagon of layer `zoom` that contains the point.
pub async fn hex_csv(
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
) -> HttpResponse {
    let (zoom, longitude, latitude) = path.into_inner();
    let Some(query) = parse_hex_query(&zoom, &longitude, &latitude) else {
        return HttpResponse::NotFound().json(ApiError {
            error: format!("No hexagon layer at {zoom}/{longitude}/{latitude}"),
        });
    };

    csv_response(&state, query, HEX_EXPORT_FILENAME).await
}

fn parse_hex_query(zoom: &str, longitude: &str, latitude: &str) -> Option<BuildingQuery> {
    let zoom_level = zoom
        .parse::<u8>()
        .ok()
        .filter(|z| (MIN_HEX_ZOOM..=MAX_HEX_ZOOM).contains(z))?;
    let longitude = longitude.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let latitude = latitude.parse::<f64>().ok().filter(|v| v.is_finite())?;

    Some(BuildingQuery::Hex {
        zoom_level,
        longitude,
        latitude,
    })
}

/// Streams the buildings of `query` as a CSV attachment.
///
/// The body stream owns the connection lease and the token's drop guard,
/// so the export cursor is released as soon as the client stops reading.
async fn csv_response(state: &AppState, query: BuildingQuery, filename: &str) -> HttpResponse {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();

    let lease = match run_cancellable(&token, state.config.connect()).await {
        Ok(lease) => lease,
        Err(e) => return error_response("export", &e),
    };

    let chunks = csv_stream(building_cursor(lease, token, query));
    let body = async_stream::stream! {
        let _guard = guard;
        pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => yield Ok(web::Bytes::from(bytes)),
                Err(e) => {
                    log::error!("CSV export failed: {e}");
                    yield Err(e);
                }
            }
        }
    };

    HttpResponse::Ok()
        .content_type("text/csv")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ))
        .streaming(body)
}

fn unknown_district(kind: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ApiError {
        error: format!("Unknown district kind: {kind}"),
    })
}

fn error_response(context: &str, error: &DbError) -> HttpResponse {
    if error.is_cancelled() {
        log::debug!("{context} request cancelled");
        return HttpResponse::ServiceUnavailable().finish();
    }

    log::error!("{context} query failed: {error}");
    HttpResponse::InternalServerError().json(ApiError {
        error: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use gce_map_database::db::DatabaseConfig;

    use super::*;

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState {
            config: DatabaseConfig::default(),
        })
    }

    #[actix_web::test]
    async fn health_reports_version() {
        let app = test::init_service(App::new().app_data(state()).configure(crate::configure)).await;
        let request = test::TestRequest::get().uri("/api/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;

        assert_eq!(body["healthy"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn unknown_district_kind_is_not_found() {
        let app = test::init_service(App::new().app_data(state()).configure(crate::configure)).await;

        let request = test::TestRequest::get()
            .uri("/api/districts/school-districts")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::NOT_FOUND);

        let request = test::TestRequest::get()
            .uri("/api/districts/school-districts/3/buildings.csv")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn hex_export_outside_layers_is_not_found() {
        let app = test::init_service(App::new().app_data(state()).configure(crate::configure)).await;
        let request = test::TestRequest::get()
            .uri("/api/hexes/18/-73.95/40.65/buildings.csv")
            .to_request();
        assert_eq!(test::call_service(&app, request).await.status(), StatusCode::NOT_FOUND);
    }

    #[::core::prelude::v1::test]
    fn hex_query_parses_layer_and_point() {
        assert_eq!(
            parse_hex_query("12", "-73.95", "40.65"),
            Some(BuildingQuery::Hex {
                zoom_level: 12,
                longitude: -73.95,
                latitude: 40.65,
            })
        );
        assert_eq!(parse_hex_query("9", "-73.95", "40.65"), None);
        assert_eq!(parse_hex_query("12", "west", "40.65"), None);
        assert_eq!(parse_hex_query("12", "-73.95", "NaN"), None);
    }

    #[::core::prelude::v1::test]
    fn cancellation_is_not_reported_as_failure() {
        let response = error_response("buildings", &DbError::Cancelled);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = error_response(
            "buildings",
            &DbError::Connection {
                message: "refused".to_string(),
            },
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
