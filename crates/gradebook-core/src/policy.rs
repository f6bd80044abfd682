//! Read-through cache for reference data.
//!
//! Levels, subjects, academic years and grading policies change rarely but
//! are read on every evaluation. [`ReferenceCache`] keeps them for a TTL and
//! exposes explicit invalidation hooks for the writes that change them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::model::{AcademicYear, AcademicYearId, GradePolicy, Level, LevelId, Subject};
use crate::traits::SchoolStore;

/// Default time-to-live for cached reference data.
pub const DEFAULT_REFERENCE_TTL: Duration = Duration::from_secs(300);

struct Cached<T> {
    value: T,
    stored_at: Instant,
}

#[derive(Default)]
struct Entries {
    levels: HashMap<LevelId, Cached<Level>>,
    level_names: HashMap<String, Cached<Level>>,
    subjects: HashMap<LevelId, Cached<Vec<Subject>>>,
    years: HashMap<AcademicYearId, Cached<AcademicYear>>,
    year_names: HashMap<String, Cached<AcademicYear>>,
    policies: HashMap<LevelId, Cached<GradePolicy>>,
}

type Select<K, T> = fn(&mut Entries) -> &mut HashMap<K, Cached<T>>;

fn levels(e: &mut Entries) -> &mut HashMap<LevelId, Cached<Level>> {
    &mut e.levels
}

fn level_names(e: &mut Entries) -> &mut HashMap<String, Cached<Level>> {
    &mut e.level_names
}

fn subjects(e: &mut Entries) -> &mut HashMap<LevelId, Cached<Vec<Subject>>> {
    &mut e.subjects
}

fn years(e: &mut Entries) -> &mut HashMap<AcademicYearId, Cached<AcademicYear>> {
    &mut e.years
}

fn year_names(e: &mut Entries) -> &mut HashMap<String, Cached<AcademicYear>> {
    &mut e.year_names
}

fn policies(e: &mut Entries) -> &mut HashMap<LevelId, Cached<GradePolicy>> {
    &mut e.policies
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// TTL cache in front of a [`SchoolStore`] for reference records.
///
/// Absent records are never cached, so a level or year created after a
/// failed lookup is found on the next call.
pub struct ReferenceCache {
    store: Arc<dyn SchoolStore>,
    ttl: Duration,
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReferenceCache {
    pub fn new(store: Arc<dyn SchoolStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: Mutex::new(Entries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lookup<K: Eq + Hash, T: Clone>(&self, select: Select<K, T>, key: &K) -> Option<T> {
        let mut entries = self.entries();
        let map = select(&mut entries);
        let fresh = match map.get(key) {
            Some(cached) if cached.stored_at.elapsed() < self.ttl => Some(cached.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        };
        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    fn remember<K: Eq + Hash, T>(&self, select: Select<K, T>, key: K, value: T) {
        let mut entries = self.entries();
        select(&mut entries).insert(
            key,
            Cached {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub async fn level(&self, id: LevelId) -> Result<Option<Level>> {
        if let Some(level) = self.lookup(levels, &id) {
            return Ok(Some(level));
        }
        let level = self.store.level(id).await?;
        if let Some(level) = &level {
            self.remember(levels, id, level.clone());
        }
        Ok(level)
    }

    pub async fn level_by_name(&self, name: &str) -> Result<Option<Level>> {
        let key = name.trim().to_string();
        if let Some(level) = self.lookup(level_names, &key) {
            return Ok(Some(level));
        }
        let level = self.store.level_by_name(&key).await?;
        if let Some(level) = &level {
            self.remember(level_names, key, level.clone());
        }
        Ok(level)
    }

    /// Subjects of a level, in report order.
    pub async fn subjects(&self, level: LevelId) -> Result<Vec<Subject>> {
        if let Some(list) = self.lookup(subjects, &level) {
            return Ok(list);
        }
        let list = self.store.subjects_for_level(level).await?;
        self.remember(subjects, level, list.clone());
        Ok(list)
    }

    pub async fn academic_year(&self, id: AcademicYearId) -> Result<Option<AcademicYear>> {
        if let Some(year) = self.lookup(years, &id) {
            return Ok(Some(year));
        }
        let year = self.store.academic_year(id).await?;
        if let Some(year) = &year {
            self.remember(years, id, year.clone());
        }
        Ok(year)
    }

    pub async fn academic_year_by_name(&self, name: &str) -> Result<Option<AcademicYear>> {
        let key = name.trim().to_string();
        if let Some(year) = self.lookup(year_names, &key) {
            return Ok(Some(year));
        }
        let year = self.store.academic_year_by_name(&key).await?;
        if let Some(year) = &year {
            self.remember(year_names, key, year.clone());
        }
        Ok(year)
    }

    /// Policy of a level, falling back to [`GradePolicy::default_for`].
    pub async fn policy(&self, level: LevelId) -> Result<GradePolicy> {
        if let Some(policy) = self.lookup(policies, &level) {
            return Ok(policy);
        }
        let policy = self
            .store
            .grade_policy(level)
            .await?
            .unwrap_or_else(|| GradePolicy::default_for(level));
        self.remember(policies, level, policy.clone());
        Ok(policy)
    }

    /// Forget every cached academic year.
    pub fn invalidate_academic_years(&self) {
        let mut entries = self.entries();
        entries.years.clear();
        entries.year_names.clear();
    }

    pub fn clear(&self) {
        *self.entries() = Entries::default();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
