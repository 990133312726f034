//! Field checks applied before any record is written.

use crate::error::{Error, Result};
use crate::model::{NewFilm, NewUser};
use chrono::NaiveDate;

pub const DESCRIPTION_MAX_LENGTH: usize = 200;

/// First public film screening; no release date may precede it.
pub fn cinema_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1895, 12, 28).unwrap_or(chrono::naive::MIN_DATE)
}

pub fn validate_film(film: &NewFilm) -> Result<()> {
    if film.name.trim().is_empty() {
        return Err(Error::invalid("film title must not be empty"));
    }
    if film.description.trim().is_empty() {
        return Err(Error::invalid("film description must not be empty"));
    }
    let length = film.description.chars().count();
    if length > DESCRIPTION_MAX_LENGTH {
        return Err(Error::invalid(format!(
            "film description is {} characters, at most {} allowed",
            length, DESCRIPTION_MAX_LENGTH
        )));
    }
    if film.release_date < cinema_epoch() {
        return Err(Error::invalid(format!(
            "release date {} is before {}",
            film.release_date,
            cinema_epoch()
        )));
    }
    if film.duration <= 0 {
        return Err(Error::invalid("film duration must be positive"));
    }
    Ok(())
}

pub fn validate_user(user: &NewUser, today: NaiveDate) -> Result<()> {
    if !user.email.contains('@') {
        return Err(Error::invalid(format!("invalid email {:?}", user.email)));
    }
    if user.login.is_empty() || user.login.chars().any(char::is_whitespace) {
        return Err(Error::invalid(format!("invalid login {:?}", user.login)));
    }
    if user.birthday > today {
        return Err(Error::invalid(format!(
            "birthday {} is in the future",
            user.birthday
        )));
    }
    Ok(())
}
