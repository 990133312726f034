use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::iter::FromIterator;

pub type FilmId = u64;
pub type UserId = u64;
pub type MpaId = u32;
pub type GenreId = u32;

/// Films refer to their rating and genres as `{ "id": n }` objects.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Film {
    pub id: FilmId,
    pub name: String,
    pub description: String,
    pub release_date: NaiveDate,
    pub duration: i32,
    #[serde(with = "mpa_ref")]
    pub mpa: Option<MpaId>,
    #[serde(with = "genre_refs")]
    pub genres: BTreeSet<GenreId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub login: String,
    pub name: String,
    pub birthday: NaiveDate,
}

/// Age/content rating.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Mpa {
    pub id: MpaId,
    pub name: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Genre {
    pub id: GenreId,
    pub name: String,
}

/// Caller-supplied film fields, before validation and id assignment.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewFilm {
    pub name: String,
    pub description: String,
    pub release_date: NaiveDate,
    pub duration: i32,
    #[serde(default, with = "mpa_ref")]
    pub mpa: Option<MpaId>,
    #[serde(default, with = "genre_refs")]
    pub genres: Vec<GenreId>,
}

#[derive(Serialize, Deserialize)]
struct IdRef<T> {
    id: T,
}

mod mpa_ref {
    use super::*;

    pub fn serialize<S>(mpa: &Option<MpaId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        mpa.map(|id| IdRef { id }).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<MpaId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<IdRef<MpaId>>::deserialize(deserializer)?.map(|mpa| mpa.id))
    }
}

mod genre_refs {
    use super::*;

    pub fn serialize<C, S>(genres: &C, serializer: S) -> Result<S::Ok, S::Error>
    where
        for<'a> &'a C: IntoIterator<Item = &'a GenreId>,
        S: Serializer,
    {
        serializer.collect_seq(genres.into_iter().map(|&id| IdRef { id }))
    }

    pub fn deserialize<'de, C, D>(deserializer: D) -> Result<C, D::Error>
    where
        C: FromIterator<GenreId>,
        D: Deserializer<'de>,
    {
        let genres = Vec::<IdRef<GenreId>>::deserialize(deserializer)?;
        Ok(genres.into_iter().map(|genre| genre.id).collect())
    }
}

/// Caller-supplied user fields. A blank or missing `name` falls back to the login.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    pub birthday: NaiveDate,
}

impl NewFilm {
    pub fn genre_set(&self) -> BTreeSet<GenreId> {
        self.genres.iter().copied().collect()
    }

    pub fn into_film(self, id: FilmId) -> Film {
        let genres = self.genre_set();
        Film {
            id,
            name: self.name,
            description: self.description,
            release_date: self.release_date,
            duration: self.duration,
            mpa: self.mpa,
            genres,
        }
    }
}

impl NewUser {
    /// Name as given, or `None` when absent or blank.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.trim().is_empty())
    }

    /// Builds the stored record for a new user, defaulting the name to the login.
    pub fn into_user(self, id: UserId) -> User {
        let name = self
            .display_name()
            .map(str::to_owned)
            .unwrap_or_else(|| self.login.clone());
        User {
            id,
            email: self.email,
            login: self.login,
            name,
            birthday: self.birthday,
        }
    }

    /// Applies an update to `current`, keeping the stored name when none is given.
    pub fn apply_to(self, current: &User) -> User {
        let name = self
            .display_name()
            .map(str::to_owned)
            .unwrap_or_else(|| current.name.clone());
        User {
            id: current.id,
            email: self.email,
            login: self.login,
            name,
            birthday: self.birthday,
        }
    }
}

pub const MPA_RATINGS: &[(MpaId, &str, &str)] = &[
    (1, "G", "No age restrictions"),
    (2, "PG", "Parental guidance suggested"),
    (3, "PG-13", "Not recommended under 13"),
    (4, "R", "Under 17 requires an accompanying adult"),
    (5, "NC-17", "No one 17 and under admitted"),
];

pub const GENRES: &[(GenreId, &str)] = &[
    (1, "Comedy"),
    (2, "Drama"),
    (3, "Animation"),
    (4, "Thriller"),
    (5, "Documentary"),
    (6, "Action"),
];

pub fn mpa_table() -> impl Iterator<Item = Mpa> {
    MPA_RATINGS.iter().map(|&(id, name, description)| Mpa {
        id,
        name: name.to_owned(),
        description: description.to_owned(),
    })
}

pub fn genre_table() -> impl Iterator<Item = Genre> {
    GENRES.iter().map(|&(id, name)| Genre {
        id,
        name: name.to_owned(),
    })
}
