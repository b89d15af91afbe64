// src/load.rs
//! Load stage contract plus two in-process loaders.
//!
//! Real backends (cache, query layer) implement [`Loader`] elsewhere; the
//! fan-out loader writes one movie into several of them in order.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;

use crate::transform::Movie;

#[async_trait::async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, movie: Movie) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Keyed in-memory store. Re-loading a movie overwrites it, so duplicate
/// deliveries are harmless.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    movies: RwLock<HashMap<String, Movie>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.movies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.movies.read().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Movie> {
        self.movies.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> Vec<Movie> {
        let mut v: Vec<Movie> = self.movies.read().values().cloned().collect();
        v.sort_by(|a, b| a.key().cmp(&b.key()));
        v
    }
}

#[async_trait::async_trait]
impl Loader for MemoryLoader {
    async fn load(&self, movie: Movie) -> Result<()> {
        self.movies.write().insert(movie.key(), movie);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Writes every movie to each inner loader; the first failure stops the chain.
pub struct FanoutLoader {
    loaders: Vec<Arc<dyn Loader>>,
}

impl FanoutLoader {
    pub fn new(loaders: Vec<Arc<dyn Loader>>) -> Self {
        Self { loaders }
    }
}

#[async_trait::async_trait]
impl Loader for FanoutLoader {
    async fn load(&self, movie: Movie) -> Result<()> {
        for l in &self.loaders {
            l.load(movie.clone())
                .await
                .map_err(|e| e.context(format!("loader {}", l.name())))?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fanout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: &str) -> Movie {
        Movie {
            imdb_id: Some(id.into()),
            movie_name: "Heat".into(),
            genres: vec![],
            directors: vec![],
            lead_actors: vec![],
            rating: None,
            awards: vec![],
            release_date: None,
        }
    }

    #[tokio::test]
    async fn duplicates_collapse() {
        let m = MemoryLoader::new();
        m.load(movie("tt1")).await.unwrap();
        m.load(movie("tt1")).await.unwrap();
        m.load(movie("tt2")).await.unwrap();
        assert_eq!(m.len(), 2);
    }

    #[tokio::test]
    async fn fanout_reaches_every_loader() {
        let a = Arc::new(MemoryLoader::new());
        let b = Arc::new(MemoryLoader::new());
        let f = FanoutLoader::new(vec![a.clone(), b.clone()]);
        f.load(movie("tt9")).await.unwrap();
        assert!(a.get("tt9").is_some());
        assert!(b.get("tt9").is_some());
    }
}
