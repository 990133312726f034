use actix_web::http::StatusCode;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer, ResponseError};
use filmrate::config::{Backend, Config};
use filmrate::model::{FilmId, GenreId, MpaId, NewFilm, NewUser, UserId};
use filmrate::{open_sled, ErrorKind, FilmRate, MemoryStorage, Storage};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fmt;

type Rate<S> = web::Data<FilmRate<S>>;
type Reply = Result<HttpResponse, ApiError>;

const DEFAULT_TOP_COUNT: i64 = 10;

#[derive(Debug)]
struct ApiError(filmrate::Error);

impl From<filmrate::Error> for ApiError {
    fn from(err: filmrate::Error) -> Self {
        ApiError(err)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::Internal => {
                error!("{:?}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match kind {
            ErrorKind::Internal => "Database error".to_owned(),
            _ => self.0.to_string(),
        };
        HttpResponse::build(status).json(ErrorBody {
            error: kind.as_str(),
            message,
        })
    }
}

#[derive(Deserialize)]
struct FilmUpdate {
    id: FilmId,
    #[serde(flatten)]
    film: NewFilm,
}

#[derive(Deserialize)]
struct UserUpdate {
    id: UserId,
    #[serde(flatten)]
    user: NewUser,
}

#[derive(Deserialize)]
struct PopularParams {
    count: Option<i64>,
}

async fn list_films<S: Storage>(rate: Rate<S>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.films()?))
}

async fn get_film<S: Storage>(rate: Rate<S>, id: web::Path<FilmId>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.film(id.into_inner())?))
}

async fn create_film<S: Storage>(rate: Rate<S>, film: web::Json<NewFilm>) -> Reply {
    Ok(HttpResponse::Created().json(rate.create_film(film.into_inner())?))
}

async fn update_film<S: Storage>(rate: Rate<S>, update: web::Json<FilmUpdate>) -> Reply {
    let FilmUpdate { id, film } = update.into_inner();
    Ok(HttpResponse::Ok().json(rate.update_film(id, film)?))
}

async fn remove_film<S: Storage>(rate: Rate<S>, id: web::Path<FilmId>) -> Reply {
    rate.remove_film(id.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

async fn add_like<S: Storage>(rate: Rate<S>, path: web::Path<(FilmId, UserId)>) -> Reply {
    let (film, user) = path.into_inner();
    rate.add_like(film, user)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn remove_like<S: Storage>(rate: Rate<S>, path: web::Path<(FilmId, UserId)>) -> Reply {
    let (film, user) = path.into_inner();
    rate.remove_like(film, user)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn popular_films<S: Storage>(rate: Rate<S>, params: web::Query<PopularParams>) -> Reply {
    let count = params.count.unwrap_or(DEFAULT_TOP_COUNT);
    Ok(HttpResponse::Ok().json(rate.top_films(count)?))
}

async fn list_users<S: Storage>(rate: Rate<S>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.users()?))
}

async fn get_user<S: Storage>(rate: Rate<S>, id: web::Path<UserId>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.user(id.into_inner())?))
}

async fn create_user<S: Storage>(rate: Rate<S>, user: web::Json<NewUser>) -> Reply {
    Ok(HttpResponse::Created().json(rate.create_user(user.into_inner())?))
}

async fn update_user<S: Storage>(rate: Rate<S>, update: web::Json<UserUpdate>) -> Reply {
    let UserUpdate { id, user } = update.into_inner();
    Ok(HttpResponse::Ok().json(rate.update_user(id, user)?))
}

async fn remove_user<S: Storage>(rate: Rate<S>, id: web::Path<UserId>) -> Reply {
    rate.remove_user(id.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

async fn add_friend<S: Storage>(rate: Rate<S>, path: web::Path<(UserId, UserId)>) -> Reply {
    let (user, friend) = path.into_inner();
    rate.add_friend(user, friend)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn remove_friend<S: Storage>(rate: Rate<S>, path: web::Path<(UserId, UserId)>) -> Reply {
    let (user, friend) = path.into_inner();
    rate.remove_friend(user, friend)?;
    Ok(HttpResponse::NoContent().finish())
}

async fn list_friends<S: Storage>(rate: Rate<S>, id: web::Path<UserId>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.friends(id.into_inner())?))
}

async fn common_friends<S: Storage>(rate: Rate<S>, path: web::Path<(UserId, UserId)>) -> Reply {
    let (user, other) = path.into_inner();
    Ok(HttpResponse::Ok().json(rate.common_friends(user, other)?))
}

async fn list_mpa<S: Storage>(rate: Rate<S>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.mpa_ratings()?))
}

async fn get_mpa<S: Storage>(rate: Rate<S>, id: web::Path<MpaId>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.mpa(id.into_inner())?))
}

async fn list_genres<S: Storage>(rate: Rate<S>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.genres()?))
}

async fn get_genre<S: Storage>(rate: Rate<S>, id: web::Path<GenreId>) -> Reply {
    Ok(HttpResponse::Ok().json(rate.genre(id.into_inner())?))
}

fn routes<S: Storage>(cfg: &mut web::ServiceConfig) {
    cfg.route("/films", web::get().to(list_films::<S>))
        .route("/films", web::post().to(create_film::<S>))
        .route("/films", web::put().to(update_film::<S>))
        .route("/films/popular", web::get().to(popular_films::<S>))
        .route("/films/{id}", web::get().to(get_film::<S>))
        .route("/films/{id}", web::delete().to(remove_film::<S>))
        .route("/films/{id}/like/{user_id}", web::put().to(add_like::<S>))
        .route("/films/{id}/like/{user_id}", web::delete().to(remove_like::<S>))
        .route("/users", web::get().to(list_users::<S>))
        .route("/users", web::post().to(create_user::<S>))
        .route("/users", web::put().to(update_user::<S>))
        .route("/users/{id}", web::get().to(get_user::<S>))
        .route("/users/{id}", web::delete().to(remove_user::<S>))
        .route("/users/{id}/friends", web::get().to(list_friends::<S>))
        .route("/users/{id}/friends/common/{other_id}", web::get().to(common_friends::<S>))
        .route("/users/{id}/friends/{friend_id}", web::put().to(add_friend::<S>))
        .route("/users/{id}/friends/{friend_id}", web::delete().to(remove_friend::<S>))
        .route("/mpa", web::get().to(list_mpa::<S>))
        .route("/mpa/{id}", web::get().to(get_mpa::<S>))
        .route("/genres", web::get().to(list_genres::<S>))
        .route("/genres/{id}", web::get().to(get_genre::<S>));
}

async fn serve<S: Storage>(rate: FilmRate<S>, bind: &str) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .data(rate.clone())
            .configure(routes::<S>)
    })
    .bind(bind)?
    .run()
    .await
}

fn startup_error(err: filmrate::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("filmrate=debug,actix_web=info"),
    )
    .init();

    let config = Config::from_env().map_err(startup_error)?;
    info!("starting with {:?}", config);

    match config.backend {
        Backend::Sled => {
            let db = open_sled(config.db_path.as_deref()).map_err(startup_error)?;
            serve(FilmRate::new(db), &config.bind).await
        }
        Backend::Memory => serve(FilmRate::new(MemoryStorage::new()), &config.bind).await,
    }
}
