//! Friendship as directed edges with a confirmation flag.
//!
//! `add_friend(a, b)` records a pending edge `a -> b`. When `b -> a` already
//! exists both edges become confirmed, and only confirmed edges show up in
//! friend lists. `remove_friend(a, b)` deletes `a -> b` and demotes `b -> a`
//! back to pending, so an edge is confirmed exactly while its reverse exists.

use crate::database::{FriendStore, IdentityStore};
use crate::error::{Error, Result};
use crate::model::UserId;
use log::debug;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct SocialGraph<S> {
    store: Arc<S>,
    writer: Arc<Mutex<()>>,
}

impl<S> Clone for SocialGraph<S> {
    fn clone(&self) -> Self {
        SocialGraph {
            store: Arc::clone(&self.store),
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<S> SocialGraph<S>
where
    S: IdentityStore + FriendStore,
{
    pub fn new(store: Arc<S>) -> Self {
        SocialGraph {
            store,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Held by every writer of the friendship relation. When both relation
    /// locks are needed the like lock is taken first.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_user(&self, user: UserId) -> Result<()> {
        if self.store.user_exists(user)? {
            Ok(())
        } else {
            Err(Error::not_found(format!("user {}", user)))
        }
    }

    pub fn add_friend(&self, user: UserId, target: UserId) -> Result<()> {
        if user == target {
            return Err(Error::invalid(format!(
                "user {} cannot befriend themselves",
                user
            )));
        }
        let _guard = self.lock();
        self.check_user(user)?;
        self.check_user(target)?;
        match self.store.request_friendship(user, target)? {
            None => Err(Error::exists(format!(
                "user {} already sent a friend request to user {}",
                user, target
            ))),
            Some(true) => {
                debug!("users {} and {} are now friends", user, target);
                Ok(())
            }
            Some(false) => {
                debug!("user {} sent a friend request to user {}", user, target);
                Ok(())
            }
        }
    }

    /// Removing an edge that does not exist is a no-op.
    pub fn remove_friend(&self, user: UserId, target: UserId) -> Result<()> {
        let _guard = self.lock();
        self.check_user(user)?;
        self.check_user(target)?;
        if self.store.unfriend(user, target)? {
            debug!("user {} removed user {} from friends", user, target);
        }
        Ok(())
    }

    pub fn friends(&self, user: UserId) -> Result<BTreeSet<UserId>> {
        self.check_user(user)?;
        self.store.friends_of(user)
    }

    pub fn common_friends(&self, user: UserId, other: UserId) -> Result<BTreeSet<UserId>> {
        let mine = self.friends(user)?;
        let theirs = self.friends(other)?;
        Ok(mine.intersection(&theirs).copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{open_sled, Storage};
    use crate::error::ErrorKind;
    use crate::memory::MemoryStorage;
    use crate::model::NewUser;
    use chrono::NaiveDate;

    fn graph(users: usize) -> (Arc<MemoryStorage>, SocialGraph<MemoryStorage>) {
        graph_on(MemoryStorage::new(), users)
    }

    fn graph_on<S: Storage>(store: S, users: usize) -> (Arc<S>, SocialGraph<S>) {
        let store = Arc::new(store);
        for i in 0..users {
            store
                .insert_user(NewUser {
                    email: format!("u{}@example.com", i),
                    login: format!("u{}", i),
                    name: None,
                    birthday: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
                })
                .unwrap();
        }
        (Arc::clone(&store), SocialGraph::new(store))
    }

    fn set(ids: &[UserId]) -> BTreeSet<UserId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn request_stays_pending_until_reciprocated() {
        let (store, graph) = graph(2);
        graph.add_friend(1, 2).unwrap();
        assert_eq!(store.friendship(1, 2).unwrap(), Some(false));
        assert!(graph.friends(1).unwrap().is_empty());
        assert!(graph.friends(2).unwrap().is_empty());

        graph.add_friend(2, 1).unwrap();
        assert_eq!(graph.friends(1).unwrap(), set(&[2]));
        assert_eq!(graph.friends(2).unwrap(), set(&[1]));
    }

    #[test]
    fn self_friendship_is_rejected() {
        let (_, graph) = graph(1);
        assert_eq!(graph.add_friend(1, 1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        // Checked before existence.
        assert_eq!(graph.add_friend(5, 5).unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn duplicate_request_is_rejected() {
        let (_, graph) = graph(2);
        graph.add_friend(1, 2).unwrap();
        assert_eq!(graph.add_friend(1, 2).unwrap_err().kind(), ErrorKind::AlreadyExists);
        graph.add_friend(2, 1).unwrap();
        assert_eq!(graph.add_friend(2, 1).unwrap_err().kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn unknown_users() {
        let (_, graph) = graph(1);
        assert_eq!(graph.add_friend(1, 2).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(graph.add_friend(2, 1).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(graph.remove_friend(1, 2).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(graph.friends(2).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(graph.common_friends(1, 2).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn removal_demotes_reverse_edge() {
        let (store, graph) = graph(2);
        graph.add_friend(1, 2).unwrap();
        graph.add_friend(2, 1).unwrap();
        graph.remove_friend(1, 2).unwrap();
        assert_eq!(store.friendship(1, 2).unwrap(), None);
        assert_eq!(store.friendship(2, 1).unwrap(), Some(false));
        assert!(graph.friends(1).unwrap().is_empty());
        assert!(graph.friends(2).unwrap().is_empty());

        // A fresh request from the remover restores the friendship.
        graph.add_friend(1, 2).unwrap();
        assert_eq!(graph.friends(1).unwrap(), set(&[2]));
        assert_eq!(graph.friends(2).unwrap(), set(&[1]));
    }

    #[test]
    fn removing_absent_edge_is_noop() {
        let (_, graph) = graph(2);
        graph.remove_friend(1, 2).unwrap();
        assert!(graph.friends(1).unwrap().is_empty());
    }

    #[test]
    fn common_friends_is_intersection() {
        let (_, graph) = graph(5);
        for &(a, b) in &[(1, 3), (1, 4), (2, 3), (2, 4), (2, 5)] {
            graph.add_friend(a, b).unwrap();
            graph.add_friend(b, a).unwrap();
        }
        // Pending only: 1 -> 5.
        graph.add_friend(1, 5).unwrap();

        let common = graph.common_friends(1, 2).unwrap();
        let expected: BTreeSet<_> = graph
            .friends(1)
            .unwrap()
            .intersection(&graph.friends(2).unwrap())
            .copied()
            .collect();
        assert_eq!(common, expected);
        assert_eq!(common, set(&[3, 4]));
        assert!(graph.common_friends(1, 1).unwrap() == graph.friends(1).unwrap());
    }

    fn reciprocal_requests_race<S: Storage>(store: S) {
        let (store, graph) = graph_on(store, 2);
        for _ in 0..20 {
            let requests: Vec<_> = vec![(1, 2), (2, 1)]
                .into_iter()
                .map(|(a, b)| {
                    let graph = graph.clone();
                    std::thread::spawn(move || graph.add_friend(a, b))
                })
                .collect();
            for request in requests {
                request.join().unwrap().unwrap();
            }
            assert_eq!(graph.friends(1).unwrap(), set(&[2]));
            assert_eq!(graph.friends(2).unwrap(), set(&[1]));

            let removals: Vec<_> = vec![(1, 2), (2, 1)]
                .into_iter()
                .map(|(a, b)| {
                    let graph = graph.clone();
                    std::thread::spawn(move || graph.remove_friend(a, b))
                })
                .collect();
            for removal in removals {
                removal.join().unwrap().unwrap();
            }
            assert_eq!(store.friendship(1, 2).unwrap(), None);
            assert_eq!(store.friendship(2, 1).unwrap(), None);
        }
    }

    #[test]
    fn concurrent_reciprocal_requests_in_memory() {
        reciprocal_requests_race(MemoryStorage::new());
    }

    #[test]
    fn concurrent_reciprocal_requests_on_sled() {
        reciprocal_requests_race(open_sled(None).unwrap());
    }

    #[test]
    fn removed_user_leaves_no_edges() {
        let (store, graph) = graph(3);
        graph.add_friend(1, 2).unwrap();
        graph.add_friend(2, 1).unwrap();
        graph.add_friend(3, 2).unwrap();
        store.remove_user(2).unwrap();
        assert!(graph.friends(1).unwrap().is_empty());
        assert_eq!(store.friendship(3, 2).unwrap(), None);
        assert_eq!(graph.add_friend(1, 2).unwrap_err().kind(), ErrorKind::NotFound);
    }
}
