use crate::error::{Error, Result};
use crate::model::*;
use sled::transaction::TransactionResult;
use sled::{IVec, Transactional};
use std::collections::{BTreeSet, HashMap};
use std::convert::{TryFrom, TryInto};
use std::path::Path;

/// Film records plus the fixed rating and genre tables they reference.
pub trait CatalogStore {
    /// Stores a new film under a freshly assigned id.
    fn insert_film(&self, film: NewFilm) -> Result<Film>;
    /// Replaces an existing film. Returns `false` if there is no film with that id.
    fn update_film(&self, film: &Film) -> Result<bool>;
    fn film(&self, id: FilmId) -> Result<Option<Film>>;
    /// All films in ascending id order.
    fn films(&self) -> Result<Vec<Film>>;
    /// Removes the film together with every like on it, all or nothing.
    fn remove_film(&self, id: FilmId) -> Result<bool>;
    fn mpa(&self, id: MpaId) -> Result<Option<Mpa>>;
    fn mpa_ratings(&self) -> Result<Vec<Mpa>>;
    fn genre(&self, id: GenreId) -> Result<Option<Genre>>;
    fn genres(&self) -> Result<Vec<Genre>>;

    fn film_exists(&self, id: FilmId) -> Result<bool> {
        Ok(self.film(id)?.is_some())
    }

    /// The subset of `ids` that has no entry in the genre table.
    fn missing_genres(&self, ids: &BTreeSet<GenreId>) -> Result<BTreeSet<GenreId>> {
        let mut missing = BTreeSet::new();
        for &id in ids {
            if self.genre(id)?.is_none() {
                missing.insert(id);
            }
        }
        Ok(missing)
    }
}

pub trait IdentityStore {
    fn insert_user(&self, user: NewUser) -> Result<User>;
    fn update_user(&self, user: &User) -> Result<bool>;
    fn user(&self, id: UserId) -> Result<Option<User>>;
    fn users(&self) -> Result<Vec<User>>;
    /// Removes the user together with its likes and every friendship edge
    /// that starts or ends at it, all or nothing.
    fn remove_user(&self, id: UserId) -> Result<bool>;

    fn user_exists(&self, id: UserId) -> Result<bool> {
        Ok(self.user(id)?.is_some())
    }
}

/// The like relation, film × user.
pub trait LikeStore {
    /// Inserts the edge. Returns `false` without writing if it was already present.
    fn insert_like(&self, film: FilmId, user: UserId) -> Result<bool>;
    fn remove_like(&self, film: FilmId, user: UserId) -> Result<bool>;
    /// Like count of every film that has at least one like.
    fn like_counts(&self) -> Result<HashMap<FilmId, usize>>;
    fn likes_of(&self, film: FilmId) -> Result<usize>;
}

/// Directed friendship edges carrying a confirmation flag.
///
/// An edge is confirmed exactly when its reverse edge exists; both writes
/// below keep that true in a single atomic step.
pub trait FriendStore {
    /// Inserts `from -> to`. If `to -> from` already exists both edges end up
    /// confirmed, otherwise the new edge is pending.
    ///
    /// Returns `None` without writing if the edge was already present, else
    /// the confirmation flag of the new edge.
    fn request_friendship(&self, from: UserId, to: UserId) -> Result<Option<bool>>;
    /// Removes `from -> to` and demotes `to -> from` to pending. Returns
    /// `false` without writing if there was no such edge.
    fn unfriend(&self, from: UserId, to: UserId) -> Result<bool>;
    /// Confirmation flag of the edge, if it exists.
    fn friendship(&self, from: UserId, to: UserId) -> Result<Option<bool>>;
    /// Targets of the confirmed outgoing edges of `user`.
    fn friends_of(&self, user: UserId) -> Result<BTreeSet<UserId>>;
}

pub trait Storage:
    CatalogStore + IdentityStore + LikeStore + FriendStore + Send + Sync + 'static
{
}

impl<T> Storage for T where
    T: CatalogStore + IdentityStore + LikeStore + FriendStore + Send + Sync + 'static
{
}

// Big-endian so that tree order equals id order.
fn serialize_id(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn deserialize_id<V: AsRef<[u8]>>(id: V) -> Result<u64> {
    let bytes = id
        .as_ref()
        .try_into()
        .map_err(|_| sled::Error::Unsupported("malformed id key".to_owned()))?;
    Ok(u64::from_be_bytes(bytes))
}

fn edge_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&serialize_id(a));
    key[8..].copy_from_slice(&serialize_id(b));
    key
}

fn split_edge_key<V: AsRef<[u8]>>(key: V) -> Result<(u64, u64)> {
    let key = key.as_ref();
    if key.len() != 16 {
        return Err(sled::Error::Unsupported("malformed edge key".to_owned()).into());
    }
    Ok((deserialize_id(&key[..8])?, deserialize_id(&key[8..])?))
}

/// Keys of the edges in `tree` whose endpoints satisfy `touches`.
fn edges_where<F: Fn(u64, u64) -> bool>(tree: &sled::Tree, touches: F) -> Result<Vec<IVec>> {
    let mut keys = Vec::new();
    for key in tree.iter().keys() {
        let key = key?;
        let (a, b) = split_edge_key(&key)?;
        if touches(a, b) {
            keys.push(key);
        }
    }
    Ok(keys)
}

fn decode_all<T: serde::de::DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>> {
    tree.iter()
        .values()
        .map(|value| -> Result<T> { Ok(bincode::deserialize(&value?)?) })
        .collect()
}

const FILMS: &[u8] = b"films";
const USERS: &[u8] = b"users";
const LIKES: &[u8] = b"likes";
const FRIENDSHIPS: &[u8] = b"friendships";
const MPA: &[u8] = b"mpa";
const GENRES_TREE: &[u8] = b"genres";
const COUNTERS: &[u8] = b"counters";

const EMPTY: &[u8] = &[];
const PENDING: &[u8] = &[0];
const CONFIRMED: &[u8] = &[1];

fn flag(confirmed: bool) -> &'static [u8] {
    if confirmed {
        CONFIRMED
    } else {
        PENDING
    }
}

/// Opens (or, without a path, creates a temporary) sled database and seeds
/// the rating and genre tables.
pub fn open_sled(path: Option<&Path>) -> Result<sled::Db> {
    let config = match path {
        Some(path) => sled::Config::new().path(path),
        None => sled::Config::new().temporary(true),
    };
    let db = config.open()?;
    seed_reference_tables(&db)?;
    Ok(db)
}

/// Next id for one kind of record. Each kind counts from 1 on its own.
fn next_id(db: &sled::Db, kind: &[u8]) -> Result<u64> {
    let counters = db.open_tree(COUNTERS)?;
    let next = counters.update_and_fetch(kind, |old| {
        let last = old
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map_or(0, u64::from_be_bytes);
        Some(serialize_id(last + 1).to_vec())
    })?;
    match next {
        Some(bytes) => deserialize_id(bytes),
        None => Err(sled::Error::Unsupported("id counter vanished".to_owned()).into()),
    }
}

fn seed_reference_tables(db: &sled::Db) -> Result<()> {
    let mpa = db.open_tree(MPA)?;
    for rating in mpa_table() {
        mpa.insert(serialize_id(rating.id.into()), bincode::serialize(&rating)?)?;
    }
    let genres = db.open_tree(GENRES_TREE)?;
    for genre in genre_table() {
        genres.insert(serialize_id(genre.id.into()), bincode::serialize(&genre)?)?;
    }
    Ok(())
}

/// Replaces the record under `key` only if one is already there.
fn replace_existing(tree: &sled::Tree, key: [u8; 8], value: Vec<u8>) -> Result<bool> {
    let replaced: TransactionResult<bool, Error> = tree.transaction(|tx| {
        if tx.get(key)?.is_none() {
            return Ok(false);
        }
        tx.insert(&key[..], value.as_slice())?;
        Ok(true)
    });
    Ok(replaced?)
}

impl CatalogStore for sled::Db {
    fn insert_film(&self, film: NewFilm) -> Result<Film> {
        let films = self.open_tree(FILMS)?;
        let film = film.into_film(next_id(self, FILMS)?);
        films.insert(serialize_id(film.id), bincode::serialize(&film)?)?;
        Ok(film)
    }

    fn update_film(&self, film: &Film) -> Result<bool> {
        let films = self.open_tree(FILMS)?;
        replace_existing(&films, serialize_id(film.id), bincode::serialize(film)?)
    }

    fn film(&self, id: FilmId) -> Result<Option<Film>> {
        let films = self.open_tree(FILMS)?;
        Ok(match films.get(serialize_id(id))? {
            Some(data) => Some(bincode::deserialize(&data)?),
            None => None,
        })
    }

    fn films(&self) -> Result<Vec<Film>> {
        decode_all(&self.open_tree(FILMS)?)
    }

    fn remove_film(&self, id: FilmId) -> Result<bool> {
        let films = self.open_tree(FILMS)?;
        let likes = self.open_tree(LIKES)?;
        let edges = likes
            .scan_prefix(serialize_id(id))
            .keys()
            .collect::<sled::Result<Vec<_>>>()?;
        let removed: TransactionResult<bool, Error> =
            (&films, &likes).transaction(|(films, likes)| {
                if films.remove(&serialize_id(id)[..])?.is_none() {
                    return Ok(false);
                }
                for key in &edges {
                    likes.remove(&key[..])?;
                }
                Ok(true)
            });
        Ok(removed?)
    }

    fn film_exists(&self, id: FilmId) -> Result<bool> {
        let films = self.open_tree(FILMS)?;
        Ok(films.contains_key(serialize_id(id))?)
    }

    fn mpa(&self, id: MpaId) -> Result<Option<Mpa>> {
        let mpa = self.open_tree(MPA)?;
        Ok(match mpa.get(serialize_id(id.into()))? {
            Some(data) => Some(bincode::deserialize(&data)?),
            None => None,
        })
    }

    fn mpa_ratings(&self) -> Result<Vec<Mpa>> {
        decode_all(&self.open_tree(MPA)?)
    }

    fn genre(&self, id: GenreId) -> Result<Option<Genre>> {
        let genres = self.open_tree(GENRES_TREE)?;
        Ok(match genres.get(serialize_id(id.into()))? {
            Some(data) => Some(bincode::deserialize(&data)?),
            None => None,
        })
    }

    fn genres(&self) -> Result<Vec<Genre>> {
        decode_all(&self.open_tree(GENRES_TREE)?)
    }
}

impl IdentityStore for sled::Db {
    fn insert_user(&self, user: NewUser) -> Result<User> {
        let users = self.open_tree(USERS)?;
        let user = user.into_user(next_id(self, USERS)?);
        users.insert(serialize_id(user.id), bincode::serialize(&user)?)?;
        Ok(user)
    }

    fn update_user(&self, user: &User) -> Result<bool> {
        let users = self.open_tree(USERS)?;
        replace_existing(&users, serialize_id(user.id), bincode::serialize(user)?)
    }

    fn user(&self, id: UserId) -> Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        Ok(match users.get(serialize_id(id))? {
            Some(data) => Some(bincode::deserialize(&data)?),
            None => None,
        })
    }

    fn users(&self) -> Result<Vec<User>> {
        decode_all(&self.open_tree(USERS)?)
    }

    fn remove_user(&self, id: UserId) -> Result<bool> {
        let users = self.open_tree(USERS)?;
        let likes = self.open_tree(LIKES)?;
        let friendships = self.open_tree(FRIENDSHIPS)?;
        let liked = edges_where(&likes, |_film, user| user == id)?;
        let linked = edges_where(&friendships, |from, to| from == id || to == id)?;
        let removed: TransactionResult<bool, Error> = (&users, &likes, &friendships).transaction(
            |(users, likes, friendships)| {
                if users.remove(&serialize_id(id)[..])?.is_none() {
                    return Ok(false);
                }
                for key in &liked {
                    likes.remove(&key[..])?;
                }
                for key in &linked {
                    friendships.remove(&key[..])?;
                }
                Ok(true)
            },
        );
        Ok(removed?)
    }

    fn user_exists(&self, id: UserId) -> Result<bool> {
        let users = self.open_tree(USERS)?;
        Ok(users.contains_key(serialize_id(id))?)
    }
}

impl LikeStore for sled::Db {
    fn insert_like(&self, film: FilmId, user: UserId) -> Result<bool> {
        let likes = self.open_tree(LIKES)?;
        let swapped =
            likes.compare_and_swap(edge_key(film, user), None as Option<&[u8]>, Some(EMPTY))?;
        Ok(swapped.is_ok())
    }

    fn remove_like(&self, film: FilmId, user: UserId) -> Result<bool> {
        let likes = self.open_tree(LIKES)?;
        Ok(likes.remove(edge_key(film, user))?.is_some())
    }

    fn like_counts(&self) -> Result<HashMap<FilmId, usize>> {
        let likes = self.open_tree(LIKES)?;
        let mut counts = HashMap::new();
        for key in likes.iter().keys() {
            let (film, _user) = split_edge_key(key?)?;
            *counts.entry(film).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn likes_of(&self, film: FilmId) -> Result<usize> {
        let likes = self.open_tree(LIKES)?;
        let mut count = 0;
        for key in likes.scan_prefix(serialize_id(film)).keys() {
            key?;
            count += 1;
        }
        Ok(count)
    }
}

impl FriendStore for sled::Db {
    fn request_friendship(&self, from: UserId, to: UserId) -> Result<Option<bool>> {
        let friendships = self.open_tree(FRIENDSHIPS)?;
        let (forward, reverse) = (edge_key(from, to), edge_key(to, from));
        let requested: TransactionResult<Option<bool>, Error> = friendships.transaction(|tx| {
            if tx.get(forward)?.is_some() {
                return Ok(None);
            }
            let confirmed = tx.get(reverse)?.is_some();
            tx.insert(&forward[..], flag(confirmed))?;
            if confirmed {
                tx.insert(&reverse[..], CONFIRMED)?;
            }
            Ok(Some(confirmed))
        });
        Ok(requested?)
    }

    fn unfriend(&self, from: UserId, to: UserId) -> Result<bool> {
        let friendships = self.open_tree(FRIENDSHIPS)?;
        let (forward, reverse) = (edge_key(from, to), edge_key(to, from));
        let removed: TransactionResult<bool, Error> = friendships.transaction(|tx| {
            if tx.remove(&forward[..])?.is_none() {
                return Ok(false);
            }
            if tx.get(reverse)?.is_some() {
                tx.insert(&reverse[..], PENDING)?;
            }
            Ok(true)
        });
        Ok(removed?)
    }

    fn friendship(&self, from: UserId, to: UserId) -> Result<Option<bool>> {
        let friendships = self.open_tree(FRIENDSHIPS)?;
        Ok(friendships
            .get(edge_key(from, to))?
            .map(|value| value.as_ref() == CONFIRMED))
    }

    fn friends_of(&self, user: UserId) -> Result<BTreeSet<UserId>> {
        let friendships = self.open_tree(FRIENDSHIPS)?;
        let mut friends = BTreeSet::new();
        for entry in friendships.scan_prefix(serialize_id(user)) {
            let (key, value) = entry?;
            if value.as_ref() == CONFIRMED {
                friends.insert(split_edge_key(key)?.1);
            }
        }
        Ok(friends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn db() -> sled::Db {
        open_sled(None).unwrap()
    }

    fn new_film(name: &str) -> NewFilm {
        NewFilm {
            name: name.to_owned(),
            description: "description".to_owned(),
            release_date: NaiveDate::from_ymd_opt(1999, 3, 31).unwrap(),
            duration: 136,
            mpa: Some(4),
            genres: vec![6, 1],
        }
    }

    fn new_user(login: &str) -> NewUser {
        NewUser {
            email: format!("{}@example.com", login),
            login: login.to_owned(),
            name: None,
            birthday: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
        }
    }

    #[test]
    fn edge_keys_order_by_first_id() {
        assert!(edge_key(1, 300) < edge_key(2, 0));
        assert!(edge_key(255, 0) < edge_key(256, 0));
        assert_eq!(split_edge_key(edge_key(7, 9)).unwrap(), (7, 9));
        assert!(split_edge_key(&[0u8; 3][..]).is_err());
    }

    #[test]
    fn films_round_trip() {
        let db = db();
        let matrix = db.insert_film(new_film("The Matrix")).unwrap();
        let heat = db.insert_film(new_film("Heat")).unwrap();
        assert_eq!((matrix.id, heat.id), (1, 2));
        assert_eq!(db.film(matrix.id).unwrap(), Some(matrix.clone()));
        assert_eq!(db.films().unwrap(), vec![matrix.clone(), heat.clone()]);

        let mut renamed = heat.clone();
        renamed.name = "Heat (1995)".to_owned();
        assert!(db.update_film(&renamed).unwrap());
        assert_eq!(db.film(heat.id).unwrap().unwrap().name, "Heat (1995)");

        assert!(db.remove_film(matrix.id).unwrap());
        assert!(!db.film_exists(matrix.id).unwrap());
        renamed.id = matrix.id;
        assert!(!db.update_film(&renamed).unwrap());
        assert!(db.film(matrix.id).unwrap().is_none());
    }

    #[test]
    fn reference_tables_are_seeded() {
        let db = db();
        assert_eq!(db.mpa_ratings().unwrap().len(), MPA_RATINGS.len());
        assert_eq!(db.mpa(3).unwrap().unwrap().name, "PG-13");
        assert!(db.mpa(9).unwrap().is_none());
        assert_eq!(db.genres().unwrap().len(), GENRES.len());
        let wanted: BTreeSet<GenreId> = vec![1, 42, 6, 77].into_iter().collect();
        let missing: Vec<_> = db.missing_genres(&wanted).unwrap().into_iter().collect();
        assert_eq!(missing, vec![42, 77]);
    }

    #[test]
    fn likes() {
        let db = db();
        assert!(db.insert_like(1, 2).unwrap());
        assert!(!db.insert_like(1, 2).unwrap());
        assert!(db.insert_like(1, 3).unwrap());
        assert!(db.insert_like(2, 3).unwrap());
        assert_eq!(db.likes_of(1).unwrap(), 2);
        assert_eq!(db.like_counts().unwrap().get(&2), Some(&1));

        assert!(db.remove_like(1, 2).unwrap());
        assert!(!db.remove_like(1, 2).unwrap());
        assert_eq!(db.likes_of(1).unwrap(), 1);
    }

    #[test]
    fn friendships() {
        let db = db();
        let a = db.insert_user(new_user("a")).unwrap().id;
        let b = db.insert_user(new_user("b")).unwrap().id;
        assert_eq!(db.request_friendship(a, b).unwrap(), Some(false));
        assert_eq!(db.request_friendship(a, b).unwrap(), None);
        assert_eq!(db.friendship(a, b).unwrap(), Some(false));
        assert!(db.friends_of(a).unwrap().is_empty());

        assert_eq!(db.request_friendship(b, a).unwrap(), Some(true));
        assert_eq!(db.friendship(a, b).unwrap(), Some(true));
        assert_eq!(db.friendship(b, a).unwrap(), Some(true));
        assert!(db.friends_of(a).unwrap().contains(&b));

        assert!(db.unfriend(b, a).unwrap());
        assert_eq!(db.friendship(b, a).unwrap(), None);
        assert_eq!(db.friendship(a, b).unwrap(), Some(false));
        assert!(!db.unfriend(b, a).unwrap());
        assert!(db.friends_of(a).unwrap().is_empty());
    }

    #[test]
    fn removing_a_film_drops_its_likes() {
        let db = db();
        let film = db.insert_film(new_film("Heat")).unwrap().id;
        let other = db.insert_film(new_film("Ronin")).unwrap().id;
        db.insert_like(film, 1).unwrap();
        db.insert_like(film, 2).unwrap();
        db.insert_like(other, 1).unwrap();

        assert!(db.remove_film(film).unwrap());
        assert_eq!(db.likes_of(film).unwrap(), 0);
        assert_eq!(db.likes_of(other).unwrap(), 1);
        assert!(!db.remove_film(film).unwrap());
    }

    #[test]
    fn removing_a_user_drops_all_its_edges() {
        let db = db();
        let a = db.insert_user(new_user("a")).unwrap().id;
        let b = db.insert_user(new_user("b")).unwrap().id;
        let c = db.insert_user(new_user("c")).unwrap().id;
        db.request_friendship(a, b).unwrap();
        db.request_friendship(b, a).unwrap();
        db.request_friendship(c, a).unwrap();
        db.request_friendship(b, c).unwrap();
        db.insert_like(10, a).unwrap();
        db.insert_like(10, b).unwrap();

        assert!(db.remove_user(a).unwrap());
        assert!(db.user(a).unwrap().is_none());
        assert_eq!(db.friendship(a, b).unwrap(), None);
        assert_eq!(db.friendship(b, a).unwrap(), None);
        assert_eq!(db.friendship(c, a).unwrap(), None);
        assert_eq!(db.friendship(b, c).unwrap(), Some(false));
        assert_eq!(db.likes_of(10).unwrap(), 1);
        assert!(!db.remove_user(a).unwrap());
    }

    #[test]
    fn films_and_users_count_ids_separately() {
        let db = db();
        assert_eq!(db.insert_user(new_user("a")).unwrap().id, 1);
        assert_eq!(db.insert_film(new_film("Heat")).unwrap().id, 1);
        assert_eq!(db.insert_film(new_film("Ronin")).unwrap().id, 2);
        assert_eq!(db.insert_user(new_user("b")).unwrap().id, 2);
    }

    #[test]
    fn reopen_keeps_records() {
        let db = db();
        let user = db.insert_user(new_user("ann")).unwrap();
        assert_eq!(user.name, "ann");
        seed_reference_tables(&db).unwrap();
        assert_eq!(db.users().unwrap(), vec![user]);
        assert_eq!(db.mpa_ratings().unwrap().len(), MPA_RATINGS.len());
    }
}
