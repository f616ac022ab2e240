//! PagedDb: единый page-addressable регион (mmap или heap) + root-кольцо.
//!
//! Файл — целое число 4096-байтовых страниц. Страницы 0..R-1 (R =
//! max_reorg_depth) — кольцо корней; слот батча b = b mod R. При открытии
//! читаются все слоты кольца, выбирается максимальный batch_id с валидным
//! CRC — так переживаются рваные записи корня.
//!
//! Конкурентность: один write-батч (CAS-флаг) + произвольные read-батчи.
//! Читатели безопасны без блокировок: закоммиченные страницы никогда не
//! мутируются на месте — только отправляются в abandoned-списки и
//! переиспользуются спустя max_reorg_depth батчей.

pub mod batch;

pub use batch::{CommitOptions, PageSource, ReadBatch, WriteBatch};

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::consts::{MAX_REORG_DEPTH_LIMIT, PAGE_SIZE};
use crate::lock::LockGuard;
use crate::page::root::{root_page_read, root_page_write, RootSnapshot};

enum Backing {
    Mem(Box<[u8]>),
    File { map: MmapMut, _lock: LockGuard },
}

pub(crate) struct DbInner {
    base: *mut u8,
    capacity_pages: u32,
    depth: u32,
    backing: Backing,
    writer: AtomicBool,
    committed: Mutex<RootSnapshot>,
}

// SAFETY: страницы региона мутируются только write-батчем и только те,
// что проштампованы текущим batch_id (не видны ни одному читателю); flush
// берёт &self. Доступ — только через view()/page_mut_raw().
unsafe impl Send for DbInner {}
unsafe impl Sync for DbInner {}

impl DbInner {
    #[inline]
    pub(crate) fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    pub(crate) fn capacity_pages(&self) -> u32 {
        self.capacity_pages
    }

    /// Страница по адресу, только чтение.
    #[inline]
    pub(crate) fn view(&self, addr: u32) -> &[u8] {
        debug_assert!(addr < self.capacity_pages);
        unsafe {
            std::slice::from_raw_parts(self.base.add(addr as usize * PAGE_SIZE), PAGE_SIZE)
        }
    }

    /// Страница по адресу, запись.
    ///
    /// SAFETY: вызывающий обязан гарантировать, что (а) страница принадлежит
    /// текущему write-батчу (или инициализируется им) и (б) на неё нет
    /// другой живой ссылки.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn page_mut_raw(&self, addr: u32) -> &mut [u8] {
        debug_assert!(addr < self.capacity_pages);
        std::slice::from_raw_parts_mut(self.base.add(addr as usize * PAGE_SIZE), PAGE_SIZE)
    }

    /// msync всего региона данных (mem-режим — no-op).
    pub(crate) fn flush_data(&self) -> Result<()> {
        match &self.backing {
            Backing::Mem(_) => Ok(()),
            Backing::File { map, .. } => map.flush().context("flush data pages"),
        }
    }

    /// msync одной страницы (используется для root-слота).
    pub(crate) fn flush_page(&self, addr: u32) -> Result<()> {
        match &self.backing {
            Backing::Mem(_) => Ok(()),
            Backing::File { map, .. } => map
                .flush_range(addr as usize * PAGE_SIZE, PAGE_SIZE)
                .with_context(|| format!("flush page {}", addr)),
        }
    }

    pub(crate) fn release_writer(&self) {
        self.writer.store(false, Ordering::Release);
    }

    pub(crate) fn committed_root(&self) -> RootSnapshot {
        self.committed.lock().expect("root lock poisoned").clone()
    }

    pub(crate) fn publish_root(&self, snap: RootSnapshot) {
        *self.committed.lock().expect("root lock poisoned") = snap;
    }
}

/// Handle базы; дешёвый Clone (Arc внутри).
#[derive(Clone)]
pub struct PagedDb {
    inner: Arc<DbInner>,
}

fn validate_depth(depth: u32) -> Result<()> {
    // Таблица abandoned-голов в корне держит depth+1 записей максимум.
    if depth == 0 || depth >= MAX_REORG_DEPTH_LIMIT {
        return Err(anyhow!(
            "max_reorg_depth must be in 1..{}, got {}",
            MAX_REORG_DEPTH_LIMIT,
            depth
        ));
    }
    Ok(())
}

fn validate_size(size: u64, depth: u32) -> Result<u32> {
    if size % PAGE_SIZE as u64 != 0 {
        return Err(anyhow!("size {} is not a multiple of page size", size));
    }
    let pages = size / PAGE_SIZE as u64;
    if pages <= depth as u64 + 1 {
        return Err(anyhow!("size {} too small for root ring + data", size));
    }
    if pages > u32::MAX as u64 {
        return Err(anyhow!("size {} exceeds 32-bit page addressing", size));
    }
    Ok(pages as u32)
}

impl PagedDb {
    /// In-memory БД фиксированного размера.
    pub fn open_memory(max_reorg_depth: u32, size_bytes: usize) -> Result<PagedDb> {
        validate_depth(max_reorg_depth)?;
        let capacity_pages = validate_size(size_bytes as u64, max_reorg_depth)?;

        let mut region = vec![0u8; size_bytes].into_boxed_slice();
        let base = region.as_mut_ptr();
        let inner = DbInner {
            base,
            capacity_pages,
            depth: max_reorg_depth,
            backing: Backing::Mem(region),
            writer: AtomicBool::new(false),
            committed: Mutex::new(RootSnapshot::genesis(max_reorg_depth)),
        };
        init_genesis_root(&inner)?;
        debug!(
            "opened in-memory db: {} pages, reorg depth {}",
            capacity_pages, max_reorg_depth
        );
        Ok(PagedDb {
            inner: Arc::new(inner),
        })
    }

    /// Persistent БД в одном файле. Файл создаётся (sparse) размером
    /// `max_size_bytes`; повторное открытие выполняет recovery по кольцу.
    pub fn open_persistent(path: &Path, max_reorg_depth: u32, max_size_bytes: u64) -> Result<PagedDb> {
        validate_depth(max_reorg_depth)?;
        let capacity_pages = validate_size(max_size_bytes, max_reorg_depth)?;

        let lock = crate::lock::acquire_exclusive(path)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open db file {}", path.display()))?;
        let existing = file.metadata()?.len();
        let fresh = existing == 0;
        if existing > max_size_bytes {
            return Err(anyhow!(
                "db file {} larger than max_size ({} > {})",
                path.display(),
                existing,
                max_size_bytes
            ));
        }
        file.set_len(max_size_bytes)
            .with_context(|| format!("size db file {}", path.display()))?;

        let mut map = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("mmap db file {}", path.display()))?;
        let base = map.as_mut_ptr();

        let inner = DbInner {
            base,
            capacity_pages,
            depth: max_reorg_depth,
            backing: Backing::File { map, _lock: lock },
            writer: AtomicBool::new(false),
            committed: Mutex::new(RootSnapshot::genesis(max_reorg_depth)),
        };

        if fresh {
            init_genesis_root(&inner)?;
            info!(
                "created db {}: {} pages, reorg depth {}",
                path.display(),
                capacity_pages,
                max_reorg_depth
            );
        } else {
            let snap = recover_root(&inner)?;
            info!(
                "recovered db {}: batch {}, block {}, {} pages in use",
                path.display(),
                snap.batch_id,
                snap.block_number,
                snap.page_count
            );
            inner.publish_root(snap);
        }

        Ok(PagedDb {
            inner: Arc::new(inner),
        })
    }

    /// Снапшот последнего закоммиченного корня.
    pub fn begin_read_only(&self) -> ReadBatch {
        ReadBatch::new(self.inner.clone())
    }

    /// Единственный писатель; Err, если write-батч уже открыт.
    pub fn begin_next(&self) -> Result<WriteBatch> {
        if self
            .inner
            .writer
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Acquire)
            .is_err()
        {
            return Err(anyhow!("write batch already open"));
        }
        Ok(WriteBatch::new(self.inner.clone()))
    }

    pub fn max_reorg_depth(&self) -> u32 {
        self.inner.depth
    }
}

/// Записать genesis-корень в слот 0 кольца.
fn init_genesis_root(inner: &DbInner) -> Result<()> {
    let snap = RootSnapshot::genesis(inner.depth);
    // SAFETY: инициализация до появления читателей.
    let buf = unsafe { inner.page_mut_raw(0) };
    root_page_write(buf, &snap)?;
    inner.flush_page(0)?;
    Ok(())
}

/// Recovery: выбрать слот с максимальным валидным batch_id.
fn recover_root(inner: &DbInner) -> Result<RootSnapshot> {
    let mut best: Option<RootSnapshot> = None;
    for slot in 0..inner.depth {
        match root_page_read(inner.view(slot)) {
            Ok(snap) => {
                let better = best
                    .as_ref()
                    .map(|b| snap.batch_id > b.batch_id)
                    .unwrap_or(true);
                if better {
                    best = Some(snap);
                }
            }
            Err(e) => {
                // Обычное дело: слот ещё не занят или порван при краше.
                debug!("root slot {} rejected: {}", slot, e);
            }
        }
    }
    best.ok_or_else(|| anyhow!("no valid root page found (all {} slots bad)", inner.depth))
}
