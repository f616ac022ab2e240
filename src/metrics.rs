//! Lightweight global metrics.
//!
//! Потокобезопасные атомарные счётчики подсистем:
//! - Аллокатор страниц (новые / переиспользованные / CoW-копии)
//! - Slotted array (дефрагментации)
//! - Bloom block-overlay (тесты / отрицательные ответы)
//! - Flusher (батчи, сброшенные блоки)
//! - Page pool (rented / returned)
//!
//! Счётчики глобальны на процесс; reset_metrics() — для тестов.

use std::sync::atomic::{AtomicU64, Ordering};

static PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static PAGES_REUSED: AtomicU64 = AtomicU64::new(0);
static COW_COPIES: AtomicU64 = AtomicU64::new(0);

static SLOTTED_DEFRAGS: AtomicU64 = AtomicU64::new(0);

static BLOOM_TESTS: AtomicU64 = AtomicU64::new(0);
static BLOOM_NEGATIVE: AtomicU64 = AtomicU64::new(0);

static FLUSH_BATCHES: AtomicU64 = AtomicU64::new(0);
static FLUSHED_BLOCKS: AtomicU64 = AtomicU64::new(0);

static POOL_RENTED: AtomicU64 = AtomicU64::new(0);
static POOL_RETURNED: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn record_page_allocated() {
    PAGES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_page_reused() {
    PAGES_REUSED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_cow_copy() {
    COW_COPIES.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_slotted_defrag() {
    SLOTTED_DEFRAGS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_bloom_test(negative: bool) {
    BLOOM_TESTS.fetch_add(1, Ordering::Relaxed);
    if negative {
        BLOOM_NEGATIVE.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_flush_batch(blocks: u64) {
    FLUSH_BATCHES.fetch_add(1, Ordering::Relaxed);
    FLUSHED_BLOCKS.fetch_add(blocks, Ordering::Relaxed);
}

#[inline]
pub fn record_pool_rented() {
    POOL_RENTED.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_pool_returned() {
    POOL_RETURNED.fetch_add(1, Ordering::Relaxed);
}

/// Моментальный снимок всех счётчиков.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub pages_allocated: u64,
    pub pages_reused: u64,
    pub cow_copies: u64,
    pub slotted_defrags: u64,
    pub bloom_tests: u64,
    pub bloom_negative: u64,
    pub flush_batches: u64,
    pub flushed_blocks: u64,
    pub pool_rented: u64,
    pub pool_returned: u64,
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        pages_allocated: PAGES_ALLOCATED.load(Ordering::Relaxed),
        pages_reused: PAGES_REUSED.load(Ordering::Relaxed),
        cow_copies: COW_COPIES.load(Ordering::Relaxed),
        slotted_defrags: SLOTTED_DEFRAGS.load(Ordering::Relaxed),
        bloom_tests: BLOOM_TESTS.load(Ordering::Relaxed),
        bloom_negative: BLOOM_NEGATIVE.load(Ordering::Relaxed),
        flush_batches: FLUSH_BATCHES.load(Ordering::Relaxed),
        flushed_blocks: FLUSHED_BLOCKS.load(Ordering::Relaxed),
        pool_rented: POOL_RENTED.load(Ordering::Relaxed),
        pool_returned: POOL_RETURNED.load(Ordering::Relaxed),
    }
}

/// Сбросить счётчики (тесты).
pub fn reset_metrics() {
    for c in [
        &PAGES_ALLOCATED,
        &PAGES_REUSED,
        &COW_COPIES,
        &SLOTTED_DEFRAGS,
        &BLOOM_TESTS,
        &BLOOM_NEGATIVE,
        &FLUSH_BATCHES,
        &FLUSHED_BLOCKS,
        &POOL_RENTED,
        &POOL_RETURNED,
    ] {
        c.store(0, Ordering::Relaxed);
    }
}
