use crate::database::Storage;
use crate::error::{Error, Result};
use crate::model::*;
use crate::popularity::PopularityIndex;
use crate::social::SocialGraph;
use crate::validate::{validate_film, validate_user};
use chrono::{Local, NaiveDate};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Entry point for callers: validates input and existence, then delegates to
/// the like and friendship managers.
pub struct FilmRate<S> {
    store: Arc<S>,
    likes: PopularityIndex<S>,
    friends: SocialGraph<S>,
}

impl<S> Clone for FilmRate<S> {
    fn clone(&self) -> Self {
        FilmRate {
            store: Arc::clone(&self.store),
            likes: self.likes.clone(),
            friends: self.friends.clone(),
        }
    }
}

fn logged<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        warn!("{} rejected: {}", operation, err);
    }
    result
}

impl<S: Storage> FilmRate<S> {
    pub fn new(store: S) -> Self {
        let store = Arc::new(store);
        FilmRate {
            likes: PopularityIndex::new(Arc::clone(&store)),
            friends: SocialGraph::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn require_user(&self, id: UserId) -> Result<()> {
        if self.store.user_exists(id)? {
            Ok(())
        } else {
            Err(Error::not_found(format!("user {}", id)))
        }
    }

    fn require_film(&self, id: FilmId) -> Result<()> {
        if self.store.film_exists(id)? {
            Ok(())
        } else {
            Err(Error::not_found(format!("film {}", id)))
        }
    }

    fn users_by_id(&self, ids: BTreeSet<UserId>) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            // A friend removed concurrently is simply left out.
            if let Some(user) = self.store.user(id)? {
                users.push(user);
            }
        }
        Ok(users)
    }

    /// Field checks plus rating and genre references; nothing is written on failure.
    fn check_film(&self, film: &NewFilm) -> Result<()> {
        validate_film(film)?;
        if let Some(mpa) = film.mpa {
            if self.store.mpa(mpa)?.is_none() {
                return Err(Error::not_found(format!("mpa rating {}", mpa)));
            }
        }
        let missing = self.store.missing_genres(&film.genre_set())?;
        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(|id| id.to_string()).collect();
            return Err(Error::not_found(format!("genres {}", ids.join(", "))));
        }
        Ok(())
    }

    // Films

    pub fn create_film(&self, film: NewFilm) -> Result<Film> {
        logged("create film", self.check_film(&film))?;
        let film = self.store.insert_film(film)?;
        debug!("created film {} {:?}", film.id, film.name);
        Ok(film)
    }

    pub fn update_film(&self, id: FilmId, film: NewFilm) -> Result<Film> {
        logged("update film", self.require_film(id))?;
        logged("update film", self.check_film(&film))?;
        let film = film.into_film(id);
        if !self.store.update_film(&film)? {
            return logged("update film", Err(Error::not_found(format!("film {}", id))));
        }
        debug!("updated film {}", id);
        Ok(film)
    }

    pub fn film(&self, id: FilmId) -> Result<Film> {
        self.store
            .film(id)?
            .ok_or_else(|| Error::not_found(format!("film {}", id)))
    }

    pub fn films(&self) -> Result<Vec<Film>> {
        self.store.films()
    }

    /// Removes the film and its likes in one store write.
    pub fn remove_film(&self, id: FilmId) -> Result<()> {
        if !self.likes.remove_film(id)? {
            return logged("remove film", Err(Error::not_found(format!("film {}", id))));
        }
        debug!("removed film {}", id);
        Ok(())
    }

    // Likes

    pub fn add_like(&self, film: FilmId, user: UserId) -> Result<()> {
        logged("add like", self.require_film(film))?;
        logged("add like", self.require_user(user))?;
        logged("add like", self.likes.add_like(film, user))
    }

    pub fn remove_like(&self, film: FilmId, user: UserId) -> Result<()> {
        logged("remove like", self.require_film(film))?;
        logged("remove like", self.require_user(user))?;
        logged("remove like", self.likes.remove_like(film, user))
    }

    pub fn like_count(&self, film: FilmId) -> Result<usize> {
        self.likes.like_count(film)
    }

    pub fn top_films(&self, count: i64) -> Result<Vec<Film>> {
        logged("top films", self.likes.top_films(count))
    }

    // Users

    pub fn create_user(&self, user: NewUser) -> Result<User> {
        self.create_user_as_of(user, Local::now().naive_local().date())
    }

    /// Like [`create_user`](Self::create_user) with an explicit current date.
    pub fn create_user_as_of(&self, user: NewUser, today: NaiveDate) -> Result<User> {
        logged("create user", validate_user(&user, today))?;
        let user = self.store.insert_user(user)?;
        debug!("created user {} {:?}", user.id, user.login);
        Ok(user)
    }

    pub fn update_user(&self, id: UserId, user: NewUser) -> Result<User> {
        self.update_user_as_of(id, user, Local::now().naive_local().date())
    }

    pub fn update_user_as_of(&self, id: UserId, user: NewUser, today: NaiveDate) -> Result<User> {
        logged("update user", validate_user(&user, today))?;
        let current = logged("update user", self.user(id))?;
        let user = user.apply_to(&current);
        if !self.store.update_user(&user)? {
            return logged("update user", Err(Error::not_found(format!("user {}", id))));
        }
        debug!("updated user {}", id);
        Ok(user)
    }

    pub fn user(&self, id: UserId) -> Result<User> {
        self.store
            .user(id)?
            .ok_or_else(|| Error::not_found(format!("user {}", id)))
    }

    pub fn users(&self) -> Result<Vec<User>> {
        self.store.users()
    }

    /// Removes the user with its likes and friendship edges in one store
    /// write, while neither relation has a writer in flight.
    pub fn remove_user(&self, id: UserId) -> Result<()> {
        let removed = {
            let _likes = self.likes.lock();
            let _friends = self.friends.lock();
            self.store.remove_user(id)?
        };
        if !removed {
            return logged("remove user", Err(Error::not_found(format!("user {}", id))));
        }
        debug!("removed user {}", id);
        Ok(())
    }

    // Friends

    pub fn add_friend(&self, user: UserId, target: UserId) -> Result<()> {
        if user == target {
            return logged("add friend", self.friends.add_friend(user, target));
        }
        logged("add friend", self.require_user(user))?;
        logged("add friend", self.require_user(target))?;
        logged("add friend", self.friends.add_friend(user, target))
    }

    pub fn remove_friend(&self, user: UserId, target: UserId) -> Result<()> {
        logged("remove friend", self.require_user(user))?;
        logged("remove friend", self.require_user(target))?;
        logged("remove friend", self.friends.remove_friend(user, target))
    }

    pub fn friends(&self, user: UserId) -> Result<Vec<User>> {
        let ids = logged("list friends", self.friends.friends(user))?;
        self.users_by_id(ids)
    }

    pub fn common_friends(&self, user: UserId, other: UserId) -> Result<Vec<User>> {
        let ids = logged("common friends", self.friends.common_friends(user, other))?;
        self.users_by_id(ids)
    }

    // Reference tables

    pub fn mpa_ratings(&self) -> Result<Vec<Mpa>> {
        self.store.mpa_ratings()
    }

    pub fn mpa(&self, id: MpaId) -> Result<Mpa> {
        self.store
            .mpa(id)?
            .ok_or_else(|| Error::not_found(format!("mpa rating {}", id)))
    }

    pub fn genres(&self) -> Result<Vec<Genre>> {
        self.store.genres()
    }

    pub fn genre(&self, id: GenreId) -> Result<Genre> {
        self.store
            .genre(id)?
            .ok_or_else(|| Error::not_found(format!("genre {}", id)))
    }
}
