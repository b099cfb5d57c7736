use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use foodgram_core::error::{NotFound, PermissionDenied, RelationError, ValidationError};
use foodgram_core::models::{
    DEFAULT_RECIPES_LIMIT, Ingredient, NewUser, RecipeDetail, RecipeFilter, RecipePayload,
    RecipeSummary, RegisteredUser, Subscription, Tag, User, UserProfile, parse_flag,
};
use foodgram_core::service::FoodgramService;
use foodgram_core::shopping_list::CONTENT_TYPE;

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<FoodgramService>>,
    signature: Arc<str>,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, FoodgramService> {
        self.service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The authenticated user behind a request, if any.
#[derive(Clone)]
struct Viewer(Option<User>);

impl Viewer {
    fn id(&self) -> Option<i64> {
        self.0.as_ref().map(|user| user.id)
    }

    fn require(&self) -> Result<&User, ApiError> {
        self.0
            .as_ref()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct IngredientQuery {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RecipesLimitQuery {
    recipes_limit: Option<String>,
}

impl RecipesLimitQuery {
    fn limit(&self) -> Result<Option<usize>, ApiError> {
        match self.recipes_limit.as_deref().map(str::trim) {
            None | Some("") => Ok(Some(DEFAULT_RECIPES_LIMIT)),
            Some(raw) => raw.parse().map(Some).map_err(|_| {
                ApiError::BadRequest(format!("recipes_limit must be a non-negative integer, got '{raw}'"))
            }),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<ValidationError>() {
            Self::BadRequest(e.to_string())
        } else if let Some(e) = err.downcast_ref::<RelationError>() {
            Self::BadRequest(e.to_string())
        } else if let Some(e) = err.downcast_ref::<NotFound>() {
            Self::NotFound(e.to_string())
        } else if let Some(e) = err.downcast_ref::<PermissionDenied>() {
            Self::Forbidden(e.to_string())
        } else {
            Self::Internal(err)
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

// --- Middleware ---

/// Resolve `Authorization: Token <t>` (or `Bearer <t>`) to a user. Requests
/// without the header pass through anonymously; a bad token is rejected.
async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default().trim().to_string());

    let viewer = match header_value {
        None => Viewer(None),
        Some(value) => {
            let token = value
                .strip_prefix("Token ")
                .or_else(|| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty());
            let user = match token {
                Some(token) => match state.service().authenticate(token) {
                    Ok(user) => user,
                    Err(err) => return ApiError::Internal(err).into_response(),
                },
                None => None,
            };
            if user.is_none() {
                warn!("rejected request with invalid token");
                return ApiError::Unauthorized("Invalid or missing token".to_string())
                    .into_response();
            }
            Viewer(user)
        }
    };

    request.extensions_mut().insert(viewer);
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- User handlers ---

async fn register_user(
    State(state): State<AppState>,
    req: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisteredUser>), ApiError> {
    let Json(req) = req?;
    let registered = state.service().register_user(&req)?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let profiles = state.service().list_profiles(viewer.id())?;
    Ok(Json(profiles))
}

async fn current_user(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = viewer.require()?;
    let profile = state.service().user_profile(user.id, Some(user.id))?;
    Ok(Json(profile))
}

async fn get_user(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<Json<UserProfile>, ApiError> {
    let profile = state.service().user_profile(id, viewer.id())?;
    Ok(Json(profile))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Query(query): Query<RecipesLimitQuery>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let user = viewer.require()?;
    let subscriptions = state.service().subscriptions(user.id, query.limit()?)?;
    Ok(Json(subscriptions))
}

async fn subscribe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(author_id): Path<i64>,
    Query(query): Query<RecipesLimitQuery>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    let user = viewer.require()?;
    let subscription = state
        .service()
        .subscribe(user.id, author_id, query.limit()?)?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(author_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = viewer.require()?;
    state.service().unsubscribe(user.id, author_id)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Catalog handlers ---

async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, ApiError> {
    Ok(Json(state.service().list_tags()?))
}

async fn get_tag(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Tag>, ApiError> {
    Ok(Json(state.service().get_tag(id)?))
}

async fn list_ingredients(
    State(state): State<AppState>,
    Query(query): Query<IngredientQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let ingredients = state.service().list_ingredients(query.name.as_deref())?;
    Ok(Json(ingredients))
}

async fn get_ingredient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Ingredient>, ApiError> {
    Ok(Json(state.service().get_ingredient(id)?))
}

// --- Recipe handlers ---

/// Build a filter from raw query pairs; `tags` may repeat.
fn recipe_filter(pairs: &[(String, String)]) -> Result<RecipeFilter, ApiError> {
    let mut filter = RecipeFilter::default();
    for (key, value) in pairs {
        match key.as_str() {
            "is_favorited" => filter.is_favorited = parse_flag(value),
            "is_in_shopping_cart" => filter.is_in_shopping_cart = parse_flag(value),
            "author" => {
                let author = value
                    .trim()
                    .parse()
                    .map_err(|_| ApiError::BadRequest(format!("Invalid author id '{value}'")))?;
                filter.author = Some(author);
            }
            "tags" => {
                let slug = value.trim().to_lowercase();
                if !slug.is_empty() && !filter.tags.contains(&slug) {
                    filter.tags.push(slug);
                }
            }
            _ => {}
        }
    }
    Ok(filter)
}

async fn list_recipes(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<RecipeDetail>>, ApiError> {
    let filter = recipe_filter(&pairs)?;
    let recipes = state.service().list_recipes(&filter, viewer.id())?;
    Ok(Json(recipes))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    payload: Result<Json<RecipePayload>, JsonRejection>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    let Json(payload) = payload?;
    let user = viewer.require()?;
    let detail = state.service().publish_recipe(user.id, &payload)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    Ok(Json(state.service().get_recipe(id, viewer.id())?))
}

async fn update_recipe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
    payload: Result<Json<RecipePayload>, JsonRejection>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let Json(payload) = payload?;
    let user = viewer.require()?;
    let detail = state.service().update_recipe(user.id, id, &payload)?;
    Ok(Json(detail))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = viewer.require()?;
    state.service().delete_recipe(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_favorite(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    let user = viewer.require()?;
    let summary = state.service().add_favorite(user.id, id)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn remove_favorite(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = viewer.require()?;
    state.service().remove_favorite(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_to_cart(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<RecipeSummary>), ApiError> {
    let user = viewer.require()?;
    let summary = state.service().add_to_cart(user.id, id)?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn remove_from_cart(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let user = viewer.require()?;
    state.service().remove_from_cart(user.id, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_shopping_cart(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<Response, ApiError> {
    let user = viewer.require()?;
    let list = state
        .service()
        .shopping_list(user, &state.signature, Local::now().date_naive())?;
    let disposition = HeaderValue::from_str(&list.content_disposition())
        .context("invalid content-disposition header")?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        list.body,
    )
        .into_response())
}

// --- Router builder ---

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(register_user).get(list_users))
        .route("/api/users/me", get(current_user))
        .route("/api/users/subscriptions", get(list_subscriptions))
        .route("/api/users/{id}", get(get_user))
        .route(
            "/api/users/{id}/subscribe",
            post(subscribe).delete(unsubscribe),
        )
        .route("/api/tags", get(list_tags))
        .route("/api/tags/{id}", get(get_tag))
        .route("/api/ingredients", get(list_ingredients))
        .route("/api/ingredients/{id}", get(get_ingredient))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/download_shopping_cart",
            get(download_shopping_cart),
        )
        .route(
            "/api/recipes/{id}",
            get(get_recipe)
                .put(update_recipe)
                .patch(update_recipe)
                .delete(delete_recipe),
        )
        .route(
            "/api/recipes/{id}/favorite",
            post(add_favorite).delete(remove_favorite),
        )
        .route(
            "/api/recipes/{id}/shopping_cart",
            post(add_to_cart).delete(remove_from_cart),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
        info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

pub async fn start_server(
    service: FoodgramService,
    port: u16,
    bind: &str,
    signature: &str,
) -> anyhow::Result<()> {
    let state = AppState {
        service: Arc::new(Mutex::new(service)),
        signature: Arc::from(signature),
    };

    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!("listening on {bind}; the API is reachable from other machines");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use foodgram_core::models::{NewIngredient, NewTag};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        state: AppState,
        anna: RegisteredUser,
        boris: RegisteredUser,
        tag: Tag,
        flour: Ingredient,
        milk: Ingredient,
    }

    fn test_app() -> TestApp {
        let service = FoodgramService::new_in_memory().unwrap();
        let register = |name: &str| {
            service
                .register_user(&NewUser {
                    email: format!("{name}@example.com"),
                    username: name.to_string(),
                    first_name: name.to_string(),
                    last_name: "Cook".to_string(),
                })
                .unwrap()
        };
        let anna = register("anna");
        let boris = register("boris");
        let tag = service
            .add_tag(&NewTag {
                name: "breakfast".to_string(),
                color: "#E26C2D".to_string(),
                slug: "breakfast".to_string(),
            })
            .unwrap();
        let add = |name: &str, unit: &str| {
            service
                .add_ingredient(&NewIngredient {
                    name: name.to_string(),
                    measurement_unit: unit.to_string(),
                })
                .unwrap()
        };
        let flour = add("flour", "g");
        let milk = add("milk", "ml");
        TestApp {
            state: AppState {
                service: Arc::new(Mutex::new(service)),
                signature: Arc::from("Foodgram"),
            },
            anna,
            boris,
            tag,
            flour,
            milk,
        }
    }

    impl TestApp {
        async fn send(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<serde_json::Value>,
        ) -> Response {
            let mut builder = axum::http::Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("Authorization", format!("Token {token}"));
            }
            let request = match body {
                Some(json) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(json.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            build_router(self.state.clone())
                .oneshot(request)
                .await
                .unwrap()
        }

        fn pancakes(&self) -> serde_json::Value {
            serde_json::json!({
                "name": "Pancakes",
                "text": "Mix and fry",
                "cooking_time": 20,
                "tags": [self.tag.id],
                "ingredients": [
                    {"id": self.flour.id, "amount": 200},
                    {"id": self.milk.id, "amount": "300"},
                ],
            })
        }

        async fn create_pancakes(&self) -> i64 {
            let response = self
                .send("POST", "/api/recipes", Some(&self.anna.token), Some(self.pancakes()))
                .await;
            assert_eq!(response.status(), StatusCode::CREATED);
            body_json(response).await["id"].as_i64().unwrap()
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn anonymous_can_read_catalog() {
        let app = test_app();
        let response = app.send("GET", "/api/tags", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json[0]["slug"], "breakfast");
        assert_eq!(json[0]["color"], "#e26c2d");

        let response = app
            .send("GET", "/api/ingredients?name=MIL", None, None)
            .await;
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["measurement_unit"], "ml");
    }

    #[tokio::test]
    async fn invalid_token_returns_401() {
        let app = test_app();
        let response = app.send("GET", "/api/tags", Some("wrong"), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid or missing token");
    }

    #[tokio::test]
    async fn bearer_scheme_is_accepted() {
        let app = test_app();
        let request = axum::http::Request::get("/api/users/me")
            .header("Authorization", format!("Bearer {}", app.boris.token))
            .body(Body::empty())
            .unwrap();
        let response = build_router(app.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["username"], "boris");
    }

    #[tokio::test]
    async fn writes_require_authentication() {
        let app = test_app();
        let response = app
            .send("POST", "/api/recipes", None, Some(app.pancakes()))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.send("GET", "/api/users/me", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_user_returns_token() {
        let app = test_app();
        let response = app
            .send(
                "POST",
                "/api/users",
                None,
                Some(serde_json::json!({"email": "cleo@example.com", "username": "cleo"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["username"], "cleo");
        let token = json["token"].as_str().unwrap().to_string();

        let response = app.send("GET", "/api/users/me", Some(&token), None).await;
        assert_eq!(body_json(response).await["email"], "cleo@example.com");

        let response = app
            .send(
                "POST",
                "/api/users",
                None,
                Some(serde_json::json!({"email": "x@example.com", "username": "bad name"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_and_fetch_recipe() {
        let app = test_app();
        let id = app.create_pancakes().await;

        let response = app
            .send("GET", &format!("/api/recipes/{id}"), None, None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["name"], "Pancakes");
        assert_eq!(json["author"]["username"], "anna");
        assert_eq!(json["author"]["is_subscribed"], false);
        assert_eq!(json["ingredients"][1]["amount"], 300);
        assert_eq!(json["tags"][0]["slug"], "breakfast");
        assert_eq!(json["is_favorited"], false);
    }

    #[tokio::test]
    async fn malformed_json_body_is_bad_request() {
        let app = test_app();
        let response = app
            .send("POST", "/api/users", None, Some(serde_json::json!([1, 2])))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn create_recipe_validation_errors() {
        let app = test_app();
        let token = Some(app.anna.token.as_str());

        let mut body = app.pancakes();
        body["ingredients"] = serde_json::json!([{"id": app.flour.id, "amount": "0"}]);
        let response = app.send("POST", "/api/recipes", token, Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("positive whole number"));

        let mut body = app.pancakes();
        body["tags"] = serde_json::json!([app.tag.id, 999]);
        let response = app.send("POST", "/api/recipes", token, Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            ValidationError::UnknownTag.to_string()
        );

        let mut body = app.pancakes();
        body["ingredients"] = serde_json::json!([]);
        let response = app.send("POST", "/api/recipes", token, Some(body)).await;
        assert_eq!(
            body_json(response).await["error"],
            ValidationError::NoIngredients.to_string()
        );

        let mut body = app.pancakes();
        body["ingredients"] = serde_json::json!([{"id": app.flour.id}]);
        let response = app.send("POST", "/api/recipes", token, Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            ValidationError::InvalidAmount {
                amount: "null".to_string()
            }
            .to_string()
        );

        let mut body = app.pancakes();
        body["ingredients"] = serde_json::json!([5]);
        let response = app.send("POST", "/api/recipes", token, Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());

        let response = app.send("GET", "/api/recipes", None, None).await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());

        let mut body = app.pancakes();
        body["cooking_time"] = serde_json::json!("20");
        let response = app.send("POST", "/api/recipes", token, Some(body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["cooking_time"], 20);
    }

    #[tokio::test]
    async fn update_by_other_user_is_forbidden() {
        let app = test_app();
        let id = app.create_pancakes().await;
        let uri = format!("/api/recipes/{id}");

        let response = app
            .send("PATCH", &uri, Some(&app.boris.token), Some(app.pancakes()))
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.send("DELETE", &uri, Some(&app.boris.token), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.send("DELETE", &uri, Some(&app.anna.token), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.send("GET", &uri, None, None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_replaces_ingredients() {
        let app = test_app();
        let id = app.create_pancakes().await;
        let body = serde_json::json!({
            "cooking_time": 5,
            "tags": [app.tag.id],
            "ingredients": [{"id": app.milk.id, "amount": 50}],
        });
        let response = app
            .send("PUT", &format!("/api/recipes/{id}"), Some(&app.anna.token), Some(body))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["cooking_time"], 5);
        assert_eq!(json["name"], "Pancakes");
        assert_eq!(json["ingredients"].as_array().unwrap().len(), 1);
        assert_eq!(json["ingredients"][0]["name"], "milk");

        let response = app
            .send(
                "PATCH",
                &format!("/api/recipes/{id}"),
                Some(&app.anna.token),
                Some(serde_json::json!({"name": "Crepes"})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            ValidationError::MissingFields.to_string()
        );
    }

    #[tokio::test]
    async fn favorite_and_cart_flow() {
        let app = test_app();
        let id = app.create_pancakes().await;
        let token = Some(app.boris.token.as_str());

        let response = app
            .send("POST", &format!("/api/recipes/{id}/favorite"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["name"], "Pancakes");
        assert_eq!(json["cooking_time"], 20);

        let response = app
            .send("POST", &format!("/api/recipes/{id}/favorite"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send("POST", &format!("/api/recipes/{id}/shopping_cart"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .send("GET", "/api/recipes?is_favorited=1&is_in_shopping_cart=true", token, None)
            .await;
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["is_favorited"], true);
        assert_eq!(json[0]["is_in_shopping_cart"], true);

        let response = app
            .send("GET", "/api/recipes?is_favorited=0", token, None)
            .await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());

        let response = app
            .send("DELETE", &format!("/api/recipes/{id}/shopping_cart"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app
            .send("DELETE", &format!("/api/recipes/{id}/shopping_cart"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send("POST", "/api/recipes/999/shopping_cart", token, None)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_recipes_by_tag_and_author() {
        let app = test_app();
        app.create_pancakes().await;

        let response = app
            .send("GET", "/api/recipes?tags=breakfast&tags=lunch", None, None)
            .await;
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

        let response = app.send("GET", "/api/recipes?tags=lunch", None, None).await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());

        let uri = format!("/api/recipes?author={}", app.boris.user.id);
        let response = app.send("GET", &uri, None, None).await;
        assert!(body_json(response).await.as_array().unwrap().is_empty());

        let response = app.send("GET", "/api/recipes?author=abc", None, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn download_shopping_cart_returns_text_file() {
        let app = test_app();
        let first = app.create_pancakes().await;
        let second = app.create_pancakes().await;
        let token = Some(app.boris.token.as_str());
        for id in [first, second] {
            app.send("POST", &format!("/api/recipes/{id}/shopping_cart"), token, None)
                .await;
        }

        let response = app
            .send("GET", "/api/recipes/download_shopping_cart", token, None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=boris_shopping_list.txt"
        );
        let text = body_text(response).await;
        let footer = format!("\nFoodgram, {}", Local::now().date_naive().format("%b-%d-%Y"));
        assert_eq!(text, format!("1. flour: 400 g\n2. milk: 600 ml\n{footer}"));

        let response = app
            .send(
                "GET",
                "/api/recipes/download_shopping_cart",
                Some(&app.anna.token),
                None,
            )
            .await;
        assert_eq!(body_text(response).await, footer);
    }

    #[tokio::test]
    async fn subscribe_flow() {
        let app = test_app();
        app.create_pancakes().await;
        let token = Some(app.boris.token.as_str());
        let anna_id = app.anna.user.id;

        let response = app
            .send(
                "POST",
                &format!("/api/users/{anna_id}/subscribe?recipes_limit=1"),
                token,
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["username"], "anna");
        assert_eq!(json["is_subscribed"], true);
        assert_eq!(json["recipes_count"], 1);

        let response = app
            .send("POST", &format!("/api/users/{anna_id}/subscribe"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let boris_id = app.boris.user.id;
        let response = app
            .send("POST", &format!("/api/users/{boris_id}/subscribe"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .send("GET", "/api/users/subscriptions?recipes_limit=0", token, None)
            .await;
        let json = body_json(response).await;
        assert_eq!(json[0]["recipes"].as_array().unwrap().len(), 0);
        assert_eq!(json[0]["recipes_count"], 1);

        let response = app
            .send("GET", &format!("/api/users/{anna_id}"), token, None)
            .await;
        assert_eq!(body_json(response).await["is_subscribed"], true);

        let response = app
            .send("DELETE", &format!("/api/users/{anna_id}/subscribe"), token, None)
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app();
        let response = app.send("GET", "/api/tags", None, None).await;
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app();
        let response = app.send("GET", "/api/tags", Some("nope"), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app();
        let request = axum::http::Request::post("/api/recipes")
            .header("content-type", "application/json")
            .header("Authorization", format!("Token {}", app.anna.token))
            .body(Body::from(vec![b' '; BODY_LIMIT + 1]))
            .unwrap();
        let response = build_router(app.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /var/lib/foodgram.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Internal server error");
    }

    #[test]
    fn domain_errors_map_to_status() {
        let cases: Vec<(anyhow::Error, StatusCode)> = vec![
            (ValidationError::UnknownTag.into(), StatusCode::BAD_REQUEST),
            (RelationError::SelfFollow.into(), StatusCode::BAD_REQUEST),
            (NotFound::new("Recipe", 1).into(), StatusCode::NOT_FOUND),
            (PermissionDenied { recipe_id: 1 }.into(), StatusCode::FORBIDDEN),
            (anyhow::anyhow!("disk on fire"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn recipes_limit_parsing() {
        let query = |raw: Option<&str>| RecipesLimitQuery {
            recipes_limit: raw.map(str::to_string),
        };
        assert_eq!(query(None).limit().unwrap(), Some(DEFAULT_RECIPES_LIMIT));
        assert_eq!(query(Some("5")).limit().unwrap(), Some(5));
        assert!(query(Some("-1")).limit().is_err());
    }
}
