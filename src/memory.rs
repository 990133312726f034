//! In-memory backend: id-keyed arenas behind a single `RwLock`.

use crate::database::{CatalogStore, FriendStore, IdentityStore, LikeStore};
use crate::error::Result;
use crate::model::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct State {
    films: BTreeMap<FilmId, Film>,
    users: BTreeMap<UserId, User>,
    next_film_id: FilmId,
    next_user_id: UserId,
    likes: BTreeSet<(FilmId, UserId)>,
    friendships: BTreeMap<(UserId, UserId), bool>,
    mpa: BTreeMap<MpaId, Mpa>,
    genres: BTreeMap<GenreId, Genre>,
}

pub struct MemoryStorage {
    state: RwLock<State>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let state = State {
            next_film_id: 1,
            next_user_id: 1,
            mpa: mpa_table().map(|rating| (rating.id, rating)).collect(),
            genres: genre_table().map(|genre| (genre.id, genre)).collect(),
            ..State::default()
        };
        MemoryStorage {
            state: RwLock::new(state),
        }
    }

    // Every write completes before the guard drops, so a poisoned lock still
    // holds consistent data.
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CatalogStore for MemoryStorage {
    fn insert_film(&self, film: NewFilm) -> Result<Film> {
        let mut state = self.write();
        let id = state.next_film_id;
        state.next_film_id += 1;
        let film = film.into_film(id);
        state.films.insert(id, film.clone());
        Ok(film)
    }

    fn update_film(&self, film: &Film) -> Result<bool> {
        let mut state = self.write();
        Ok(match state.films.get_mut(&film.id) {
            Some(stored) => {
                *stored = film.clone();
                true
            }
            None => false,
        })
    }

    fn film(&self, id: FilmId) -> Result<Option<Film>> {
        Ok(self.read().films.get(&id).cloned())
    }

    fn films(&self) -> Result<Vec<Film>> {
        Ok(self.read().films.values().cloned().collect())
    }

    fn remove_film(&self, id: FilmId) -> Result<bool> {
        let mut state = self.write();
        if state.films.remove(&id).is_none() {
            return Ok(false);
        }
        state.likes.retain(|&(film, _)| film != id);
        Ok(true)
    }

    fn film_exists(&self, id: FilmId) -> Result<bool> {
        Ok(self.read().films.contains_key(&id))
    }

    fn mpa(&self, id: MpaId) -> Result<Option<Mpa>> {
        Ok(self.read().mpa.get(&id).cloned())
    }

    fn mpa_ratings(&self) -> Result<Vec<Mpa>> {
        Ok(self.read().mpa.values().cloned().collect())
    }

    fn genre(&self, id: GenreId) -> Result<Option<Genre>> {
        Ok(self.read().genres.get(&id).cloned())
    }

    fn genres(&self) -> Result<Vec<Genre>> {
        Ok(self.read().genres.values().cloned().collect())
    }

    fn missing_genres(&self, ids: &BTreeSet<GenreId>) -> Result<BTreeSet<GenreId>> {
        let state = self.read();
        Ok(ids
            .iter()
            .filter(|id| !state.genres.contains_key(*id))
            .copied()
            .collect())
    }
}

impl IdentityStore for MemoryStorage {
    fn insert_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.write();
        let id = state.next_user_id;
        state.next_user_id += 1;
        let user = user.into_user(id);
        state.users.insert(id, user.clone());
        Ok(user)
    }

    fn update_user(&self, user: &User) -> Result<bool> {
        let mut state = self.write();
        Ok(match state.users.get_mut(&user.id) {
            Some(stored) => {
                *stored = user.clone();
                true
            }
            None => false,
        })
    }

    fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read().users.get(&id).cloned())
    }

    fn users(&self) -> Result<Vec<User>> {
        Ok(self.read().users.values().cloned().collect())
    }

    fn remove_user(&self, id: UserId) -> Result<bool> {
        let mut state = self.write();
        if state.users.remove(&id).is_none() {
            return Ok(false);
        }
        state.likes.retain(|&(_, user)| user != id);
        state
            .friendships
            .retain(|&(from, to), _| from != id && to != id);
        Ok(true)
    }

    fn user_exists(&self, id: UserId) -> Result<bool> {
        Ok(self.read().users.contains_key(&id))
    }
}

impl LikeStore for MemoryStorage {
    fn insert_like(&self, film: FilmId, user: UserId) -> Result<bool> {
        Ok(self.write().likes.insert((film, user)))
    }

    fn remove_like(&self, film: FilmId, user: UserId) -> Result<bool> {
        Ok(self.write().likes.remove(&(film, user)))
    }

    fn like_counts(&self) -> Result<HashMap<FilmId, usize>> {
        let mut counts = HashMap::new();
        for &(film, _user) in &self.read().likes {
            *counts.entry(film).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn likes_of(&self, film: FilmId) -> Result<usize> {
        Ok(self
            .read()
            .likes
            .range((film, UserId::MIN)..=(film, UserId::MAX))
            .count())
    }
}

impl FriendStore for MemoryStorage {
    fn request_friendship(&self, from: UserId, to: UserId) -> Result<Option<bool>> {
        let mut state = self.write();
        if state.friendships.contains_key(&(from, to)) {
            return Ok(None);
        }
        let confirmed = match state.friendships.get_mut(&(to, from)) {
            Some(reverse) => {
                *reverse = true;
                true
            }
            None => false,
        };
        state.friendships.insert((from, to), confirmed);
        Ok(Some(confirmed))
    }

    fn unfriend(&self, from: UserId, to: UserId) -> Result<bool> {
        let mut state = self.write();
        if state.friendships.remove(&(from, to)).is_none() {
            return Ok(false);
        }
        if let Some(reverse) = state.friendships.get_mut(&(to, from)) {
            *reverse = false;
        }
        Ok(true)
    }

    fn friendship(&self, from: UserId, to: UserId) -> Result<Option<bool>> {
        Ok(self.read().friendships.get(&(from, to)).copied())
    }

    fn friends_of(&self, user: UserId) -> Result<BTreeSet<UserId>> {
        Ok(self
            .read()
            .friendships
            .range((user, UserId::MIN)..=(user, UserId::MAX))
            .filter(|(_, confirmed)| **confirmed)
            .map(|(&(_, to), _)| to)
            .collect())
    }
}
