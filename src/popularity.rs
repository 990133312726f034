//! The like relation and the "top films" ranking derived from it.

use crate::database::{CatalogStore, IdentityStore, LikeStore};
use crate::error::{Error, Result};
use crate::model::{Film, FilmId, UserId};
use log::debug;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct PopularityIndex<S> {
    store: Arc<S>,
    writer: Arc<Mutex<()>>,
}

impl<S> Clone for PopularityIndex<S> {
    fn clone(&self) -> Self {
        PopularityIndex {
            store: Arc::clone(&self.store),
            writer: Arc::clone(&self.writer),
        }
    }
}

/// Orders films by descending like count, then ascending id, and keeps the first `n`.
pub fn rank(mut films: Vec<Film>, counts: &HashMap<FilmId, usize>, n: usize) -> Vec<Film> {
    films.sort_by_key(|film| (Reverse(counts.get(&film.id).copied().unwrap_or(0)), film.id));
    films.truncate(n);
    films
}

impl<S> PopularityIndex<S>
where
    S: CatalogStore + IdentityStore + LikeStore,
{
    pub fn new(store: Arc<S>) -> Self {
        PopularityIndex {
            store,
            writer: Arc::new(Mutex::new(())),
        }
    }

    // Serialises writers to the like relation.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_endpoints(&self, film: FilmId, user: UserId) -> Result<()> {
        if !self.store.film_exists(film)? {
            return Err(Error::not_found(format!("film {}", film)));
        }
        if !self.store.user_exists(user)? {
            return Err(Error::not_found(format!("user {}", user)));
        }
        Ok(())
    }

    pub fn add_like(&self, film: FilmId, user: UserId) -> Result<()> {
        let _guard = self.lock();
        self.check_endpoints(film, user)?;
        if !self.store.insert_like(film, user)? {
            return Err(Error::exists(format!(
                "user {} already likes film {}",
                user, film
            )));
        }
        debug!("user {} liked film {}", user, film);
        Ok(())
    }

    pub fn remove_like(&self, film: FilmId, user: UserId) -> Result<()> {
        let _guard = self.lock();
        self.check_endpoints(film, user)?;
        if !self.store.remove_like(film, user)? {
            return Err(Error::not_found(format!(
                "user {} does not like film {}",
                user, film
            )));
        }
        debug!("user {} unliked film {}", user, film);
        Ok(())
    }

    pub fn like_count(&self, film: FilmId) -> Result<usize> {
        if !self.store.film_exists(film)? {
            return Err(Error::not_found(format!("film {}", film)));
        }
        self.store.likes_of(film)
    }

    /// The `n` most liked films. Films without likes rank last; ties go to the lower id.
    pub fn top_films(&self, n: i64) -> Result<Vec<Film>> {
        if n <= 0 {
            return Err(Error::invalid(format!(
                "film count must be positive, got {}",
                n
            )));
        }
        let n = usize::try_from(n).unwrap_or(usize::MAX);
        let counts = self.store.like_counts()?;
        Ok(rank(self.store.films()?, &counts, n))
    }

    /// Removes the film and its likes while no like is being written.
    pub fn remove_film(&self, film: FilmId) -> Result<bool> {
        let _guard = self.lock();
        self.store.remove_film(film)
    }
}
