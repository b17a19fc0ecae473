//! HTTP handler functions for the census radius API.

use std::sync::Arc;
use std::time::Instant;

use actix_web::http::StatusCode;
use actix_web::http::header::{self, ContentType};
use actix_web::{HttpResponse, HttpResponseBuilder, web};
use census_radius_query::{Query, QueryError};
use census_radius_server_models::{ApiHealth, ApiPopulation, POP2010_USAGE};

use crate::AppState;

/// Starts a response with the no-store and no-sniff headers every
/// endpoint sends.
fn respond(status: StatusCode) -> HttpResponseBuilder {
    let mut builder = HttpResponse::build(status);
    builder
        .insert_header((header::CACHE_CONTROL, "no-cache,no-store"))
        .insert_header((header::X_CONTENT_TYPE_OPTIONS, "nosniff"));
    builder
}

fn bad_request(message: &str) -> HttpResponse {
    respond(StatusCode::BAD_REQUEST)
        .content_type(ContentType::plaintext())
        .body(format!("400 Bad Request: {message}"))
}

fn internal_error() -> HttpResponse {
    respond(StatusCode::INTERNAL_SERVER_ERROR)
        .content_type(ContentType::plaintext())
        .body("500 Internal Server Error")
}

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let dataset = state.engine.dataset();
    respond(StatusCode::OK).json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        blocks: dataset.len(),
        layout: dataset.layout().to_string(),
        payloads: state.engine.payloads().label().to_string(),
    })
}

/// `GET /api/pop2010`
///
/// Returns the plain-text usage document.
pub async fn pop2010_usage() -> HttpResponse {
    respond(StatusCode::OK)
        .content_type(ContentType::plaintext())
        .body(POP2010_USAGE)
}

/// `GET /api/pop2010/{distance}/lat/{lat}/lon/{lon}`
///
/// Sums the 2010 census population within `distance` meters of the
/// location. The scan is CPU-bound, so it runs on the blocking pool.
pub async fn pop2010(
    state: web::Data<AppState>,
    path: web::Path<(String, String, String)>,
) -> HttpResponse {
    let start = Instant::now();
    let (distance, lat, lon) = path.into_inner();

    let query = match parse_query(&distance, &lat, &lon) {
        Ok(query) => query,
        Err(e) => return bad_request(&e.to_string()),
    };

    let engine = Arc::clone(&state.engine);
    match web::block(move || engine.query(&query)).await {
        Ok(Ok(result)) => respond(StatusCode::OK).json(ApiPopulation::new(
            &result,
            i64::from(query.radius_meters()),
            query.lat(),
            query.lon(),
            start.elapsed(),
        )),
        Ok(Err(e)) if e.is_client_error() => bad_request(&e.to_string()),
        Ok(Err(e)) => {
            log::error!("pop2010 query failed: {e}");
            internal_error()
        }
        Err(e) => {
            log::error!("pop2010 query did not complete: {e}");
            internal_error()
        }
    }
}

fn parse_query(distance: &str, lat: &str, lon: &str) -> Result<Query, QueryError> {
    let distance = distance
        .parse::<i64>()
        .map_err(|e| QueryError::Validation(format!("distance {distance:?}: {e}")))?;
    let lat = lat
        .parse::<f64>()
        .map_err(|e| QueryError::Validation(format!("latitude {lat:?}: {e}")))?;
    let lon = lon
        .parse::<f64>()
        .map_err(|e| QueryError::Validation(format!("longitude {lon:?}: {e}")))?;
    Query::new(lat, lon, distance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};
    use census_radius_census_models::{AGE_BRACKET_COUNT, DemographicRecord};
    use census_radius_dataset::{DatasetLayout, DatasetLoader};
    use census_radius_geodesy::Wgs84;
    use census_radius_query::{PayloadSource, QueryEngine, QueryOptions};
    use census_radius_store::MemoryRecordStore;

    fn payload(population: u32) -> DemographicRecord {
        let mut female_ages = [0; AGE_BRACKET_COUNT];
        female_ages[0] = population;
        DemographicRecord {
            population,
            male_population: 0,
            female_population: population,
            male_ages: [0; AGE_BRACKET_COUNT],
            female_ages,
        }
    }

    /// Two blocks about 1.1 km apart on the same meridian.
    fn state(payloads: PayloadSource) -> web::Data<AppState> {
        let loader = DatasetLoader::new(Arc::new(Wgs84::new()));
        let dataset = loader
            .build(
                vec![
                    loader.locate("A", 40.0, -75.0, 100, Some(payload(100))),
                    loader.locate("B", 40.01, -75.0, 50, Some(payload(50))),
                ],
                DatasetLayout::Extended,
            )
            .unwrap();
        let engine = QueryEngine::new(
            Arc::new(dataset),
            payloads,
            QueryOptions {
                workers: 1,
                ..QueryOptions::default()
            },
        )
        .unwrap();
        web::Data::new(AppState {
            engine: Arc::new(engine),
        })
    }

    fn assert_no_store_headers(resp: &actix_web::dev::ServiceResponse) {
        let headers = resp.headers();
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-cache,no-store");
        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
    }

    #[actix_web::test]
    async fn pop2010_returns_totals() {
        let app = test::init_service(
            App::new()
                .app_data(state(PayloadSource::Resident))
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/pop2010/1500/lat/40/lon/-75")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_no_store_headers(&resp);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["distance"], 1500);
        assert_eq!(body["blocks"], 2);
        assert_eq!(body["pop2010"], 150);
        assert_eq!(body["pop2010_female"], 150);
        assert_eq!(body["pop2010_male"], 0);
        assert_eq!(body["ages_female"]["age_under5"], 150);
        assert!(body["duration_msec"].is_u64());
    }

    #[actix_web::test]
    async fn pop2010_small_radius_excludes_far_block() {
        let app = test::init_service(
            App::new()
                .app_data(state(PayloadSource::Resident))
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/pop2010/500/lat/40.0/lon/-75.0")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["blocks"], 1);
        assert_eq!(body["pop2010"], 100);
    }

    #[actix_web::test]
    async fn pop2010_rejects_bad_parameters() {
        let app = test::init_service(
            App::new()
                .app_data(state(PayloadSource::Resident))
                .configure(crate::configure),
        )
        .await;

        for uri in [
            "/api/pop2010/3000000/lat/40/lon/-75",
            "/api/pop2010/0/lat/40/lon/-75",
            "/api/pop2010/1.5/lat/40/lon/-75",
            "/api/pop2010/100/lat/91/lon/-75",
            "/api/pop2010/100/lat/40/lon/west",
            "/api/pop2010/100/lat/NaN/lon/-75",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_no_store_headers(&resp);
            let body = test::read_body(resp).await;
            assert!(body.starts_with(b"400 Bad Request"), "{uri}");
        }
    }

    #[actix_web::test]
    async fn pop2010_store_miss_is_internal_error() {
        let store = MemoryRecordStore::from_payloads(vec![("A".to_string(), payload(100))]).unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state(PayloadSource::Store(Arc::new(store))))
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/pop2010/1500/lat/40/lon/-75")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_no_store_headers(&resp);
        assert_eq!(test::read_body(resp).await, "500 Internal Server Error");
    }

    #[actix_web::test]
    async fn usage_and_health_respond() {
        let app = test::init_service(
            App::new()
                .app_data(state(PayloadSource::Resident))
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/pop2010").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("{distance}"));

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let health: ApiHealth = test::call_and_read_body_json(&app, req).await;
        assert!(health.healthy);
        assert_eq!(health.blocks, 2);
        assert_eq!(health.layout, "extended");
        assert_eq!(health.payloads, "resident");
    }
}
