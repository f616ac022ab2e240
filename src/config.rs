//! Centralized configuration for the blockchain overlay and commits.
//!
//! Goals:
//! - Одно место для тюнингов вместо разбросанных env-чтений.
//! - PaprikaConfig::from_env() читает PK_*-переменные; with_* — точечные
//!   переопределения в builder-стиле.
//!
//! Env:
//! - PK_FLUSH_WINDOW_MS   -- окно батчирования flusher-а (default 2000)
//! - PK_POOL_PAGES        -- преаллокация пула страниц (default 1024)
//! - PK_POOL_MAX_PAGES    -- потолок пула, 0 = без потолка (default 0)
//! - PK_COMMIT            -- data | data+root | none | nowrite

use std::fmt;
use std::time::Duration;

use crate::store::CommitOptions;

#[derive(Clone, Debug)]
pub struct PaprikaConfig {
    /// Сколько времени flusher сливает блоки в один коммит.
    pub flush_window: Duration,

    /// Страниц пула, преаллоцированных на старте.
    pub pool_pages: usize,

    /// Потолок пула; None — расти без ограничений.
    pub pool_max_pages: Option<usize>,

    /// Долговечность коммитов flusher-а.
    pub commit_options: CommitOptions,
}

impl Default for PaprikaConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_millis(2000),
            pool_pages: 1024,
            pool_max_pages: None,
            commit_options: CommitOptions::FlushDataAndRoot,
        }
    }
}

impl PaprikaConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PK_FLUSH_WINDOW_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.flush_window = Duration::from_millis(n);
            }
        }
        if let Ok(v) = std::env::var("PK_POOL_PAGES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.pool_pages = n;
            }
        }
        if let Ok(v) = std::env::var("PK_POOL_MAX_PAGES") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.pool_max_pages = if n == 0 { None } else { Some(n) };
            }
        }
        if let Ok(v) = std::env::var("PK_COMMIT") {
            match v.trim().to_ascii_lowercase().as_str() {
                "data" => cfg.commit_options = CommitOptions::FlushDataOnly,
                "data+root" | "root" => cfg.commit_options = CommitOptions::FlushDataAndRoot,
                "none" => cfg.commit_options = CommitOptions::DangerNoFlush,
                "nowrite" => cfg.commit_options = CommitOptions::DangerNoWrite,
                _ => {}
            }
        }

        cfg
    }

    // Fluent-переопределения.

    pub fn with_flush_window(mut self, window: Duration) -> Self {
        self.flush_window = window;
        self
    }

    pub fn with_pool_pages(mut self, pages: usize) -> Self {
        self.pool_pages = pages;
        self
    }

    pub fn with_pool_max_pages(mut self, max: Option<usize>) -> Self {
        self.pool_max_pages = max;
        self
    }

    pub fn with_commit_options(mut self, options: CommitOptions) -> Self {
        self.commit_options = options;
        self
    }
}

impl fmt::Display for PaprikaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PaprikaConfig {{ flush_window: {:?}, pool_pages: {}, pool_max_pages: {}, commit: {:?} }}",
            self.flush_window,
            self.pool_pages,
            self.pool_max_pages
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.commit_options
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let cfg = PaprikaConfig::default()
            .with_flush_window(Duration::from_millis(10))
            .with_pool_pages(8)
            .with_pool_max_pages(Some(16))
            .with_commit_options(CommitOptions::DangerNoFlush);
        assert_eq!(cfg.flush_window, Duration::from_millis(10));
        assert_eq!(cfg.pool_pages, 8);
        assert_eq!(cfg.pool_max_pages, Some(16));
        assert_eq!(cfg.commit_options, CommitOptions::DangerNoFlush);
    }
}
