//! Write/read batches over the paged store.
//!
//! WriteBatch — единица атомарного коммита: batch_id = committed + 1, все
//! мутации идут через copy-on-write (первое касание страницы в батче
//! заменяет её свежей копией, старый адрес уходит в abandoned-список
//! текущего батча). ReadBatch — снапшот последнего закоммиченного корня;
//! его страницы стабильны весь срок жизни батча.
//!
//! Политика аллокации: сперва адреса из abandoned-цепочек батчей, вышедших
//! из окна видимости (current - b > max_reorg_depth), затем — рост
//! watermark-а. Непотреблённые к коммиту адреса регистрируются заново в
//! цепочке текущего батча: страница не теряется, переиспользование лишь
//! сдвигается на одно окно.

use anyhow::{anyhow, Result};
use log::debug;
use primitive_types::{H256, U256};
use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::account::{storage_value_from_bytes, Account};
use crate::consts::ADDR_NULL;
use crate::key;
use crate::metrics::{record_cow_copy, record_page_allocated, record_page_reused};
use crate::nibble::{NibblePath, NibblePathBuf};
use crate::page::abandoned::{ab_entries, ab_init, ab_next, ab_push};
use crate::page::data::{tree_delete_by_prefix, tree_get, tree_scan, tree_set};
use crate::page::root::{root_page_write, RootSnapshot};
use crate::page::{page_batch_id, set_page_batch_id};
use crate::store::DbInner;

/// Уровень долговечности коммита.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOptions {
    /// fsync данных; корень записан, но не fsync-нут. Атомарно, но последний
    /// батч может потеряться при краше (recovery выберет предыдущий корень).
    FlushDataOnly,
    /// fsync данных, затем fsync корня. Атомарно и долговечно.
    FlushDataAndRoot,
    /// Запись без fsync. Только для отладки/бенчей.
    DangerNoFlush,
    /// Корень вообще не пишется. Только для отладки.
    DangerNoWrite,
}

/// Доступ к страницам по адресу (общий для read/write батчей).
pub trait PageSource {
    fn page(&self, addr: u32) -> &[u8];
}

struct BatchState {
    root: RootSnapshot,
    reusable: Vec<u32>,
    abandoned_head: u32,
}

pub struct WriteBatch {
    db: Arc<DbInner>,
    batch_id: u32,
    state: RefCell<BatchState>,
    committed: Cell<bool>,
}

impl WriteBatch {
    pub(crate) fn new(db: Arc<DbInner>) -> WriteBatch {
        let committed = db.committed_root();
        let batch_id = committed.batch_id + 1;
        let depth = db.depth();

        // Собираем адреса из цепочек, вышедших из окна видимости.
        let mut root = committed;
        root.batch_id = batch_id;
        let mut reusable = Vec::new();
        root.abandoned.retain(|(b, head)| {
            if batch_id.wrapping_sub(*b) > depth {
                let mut addr = *head;
                while addr != ADDR_NULL {
                    let page = db.view(addr);
                    reusable.extend(ab_entries(page));
                    let next = ab_next(page);
                    // Сама страница списка тоже свободна.
                    reusable.push(addr);
                    addr = next;
                }
                false
            } else {
                true
            }
        });
        if !reusable.is_empty() {
            debug!(
                "batch {}: harvested {} reusable pages",
                batch_id,
                reusable.len()
            );
        }

        WriteBatch {
            db,
            batch_id,
            state: RefCell::new(BatchState {
                root,
                reusable,
                abandoned_head: ADDR_NULL,
            }),
            committed: Cell::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.batch_id
    }

    /// Страница уже скопирована/создана в этом батче?
    #[inline]
    pub fn was_written(&self, addr: u32) -> bool {
        page_batch_id(self.db.view(addr)) == self.batch_id
    }

    /// Страница по адресу, только чтение.
    #[inline]
    pub fn get_at(&self, addr: u32) -> &[u8] {
        self.db.view(addr)
    }

    /// Текущий адрес корня дерева (ADDR_NULL — пустое дерево).
    pub fn tree_root(&self) -> u32 {
        self.state.borrow().root.tree_root
    }

    /// Выдать адрес свободной страницы (reuse или рост watermark-а).
    fn alloc_addr(&self) -> Result<u32> {
        let mut st = self.state.borrow_mut();
        if let Some(addr) = st.reusable.pop() {
            record_page_reused();
            return Ok(addr);
        }
        let addr = st.root.page_count;
        if addr >= self.db.capacity_pages() {
            return Err(anyhow!(
                "database full: {} pages in use",
                self.db.capacity_pages()
            ));
        }
        st.root.page_count += 1;
        record_page_allocated();
        Ok(addr)
    }

    /// Новая страница текущего батча. При `clear` содержимое обнуляется и
    /// штампуется batch_id; иначе инициализация на вызывающем.
    pub fn get_new_page(&self, clear: bool) -> Result<u32> {
        let addr = self.alloc_addr()?;
        if clear {
            let page = self.page_mut(addr);
            for b in page.iter_mut() {
                *b = 0;
            }
            set_page_batch_id(page, self.batch_id);
        }
        Ok(addr)
    }

    /// CoW: свежая копия страницы, штамп текущего батча, старый адрес — в
    /// abandoned-список.
    pub fn get_writable_copy(&self, addr: u32) -> Result<u32> {
        debug_assert!(!self.was_written(addr));
        let fresh = self.alloc_addr()?;
        let src = self.db.view(addr);
        let dst = self.page_mut(fresh);
        dst.copy_from_slice(src);
        set_page_batch_id(dst, self.batch_id);
        self.register_for_future_reuse(addr)?;
        record_cow_copy();
        Ok(fresh)
    }

    /// get_at + CoW при необходимости; возвращает (возможно новый) адрес.
    pub fn ensure_writable(&self, addr: u32) -> Result<u32> {
        if self.was_written(addr) {
            Ok(addr)
        } else {
            self.get_writable_copy(addr)
        }
    }

    /// Зарегистрировать страницу на переиспользование после окна видимости.
    pub fn register_for_future_reuse(&self, addr: u32) -> Result<()> {
        let head = self.state.borrow().abandoned_head;
        if head != ADDR_NULL {
            let page = self.page_mut(head);
            if ab_push(page, addr) {
                return Ok(());
            }
        }
        // Голова отсутствует или заполнена — растим цепочку.
        let fresh = self.alloc_addr()?;
        {
            let page = self.page_mut(fresh);
            ab_init(page, self.batch_id, head);
            let ok = ab_push(page, addr);
            debug_assert!(ok);
        }
        self.state.borrow_mut().abandoned_head = fresh;
        Ok(())
    }

    /// Страница на запись. Внутренний API дерева: вызывающий обязан не
    /// держать второй ссылки на тот же адрес.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn page_mut(&self, addr: u32) -> &mut [u8] {
        // SAFETY: страницы текущего батча не видны читателям; дисциплина
        // одного заимствования обеспечивается кодом дерева.
        unsafe { self.db.page_mut_raw(addr) }
    }

    /// Метаданные блока, попадут в корень при коммите.
    pub fn set_metadata(&self, block_number: u32, block_hash: H256) {
        let mut st = self.state.borrow_mut();
        st.root.block_number = block_number;
        st.root.block_hash = block_hash;
    }

    pub fn metadata(&self) -> (u32, H256) {
        let st = self.state.borrow();
        (st.root.block_number, st.root.block_hash)
    }

    /// Записать пару (ключ, значение) в дерево. Пустое значение — удаление.
    pub fn set_raw(&self, key_path: &NibblePath<'_>, value: &[u8]) -> Result<()> {
        let root = self.state.borrow().root.tree_root;
        let new_root = tree_set(self, root, key_path, value)?;
        self.state.borrow_mut().root.tree_root = new_root;
        Ok(())
    }

    pub fn try_get(&self, key_path: &NibblePath<'_>) -> Option<&[u8]> {
        let root = self.state.borrow().root.tree_root;
        tree_get(self, root, key_path)
    }

    /// Удалить все записи с данным префиксом ключа.
    pub fn delete_by_prefix(&self, prefix: &NibblePath<'_>) -> Result<()> {
        let root = self.state.borrow().root.tree_root;
        let new_root = tree_delete_by_prefix(self, root, prefix)?;
        self.state.borrow_mut().root.tree_root = new_root;
        Ok(())
    }

    /// Коммит батча: данные -> корень в слот кольца -> (опц.) fsync.
    pub fn commit(self, options: CommitOptions) -> Result<()> {
        // Непотреблённые harvested-адреса не теряем: регистрируем в цепочке
        // текущего батча.
        loop {
            let leftover = { self.state.borrow_mut().reusable.pop() };
            match leftover {
                Some(addr) => self.register_for_future_reuse(addr)?,
                None => break,
            }
        }

        let mut st = self.state.borrow_mut();
        let head = st.abandoned_head;
        if head != ADDR_NULL {
            st.root.abandoned.push((self.batch_id, head));
        }

        if options == CommitOptions::DangerNoWrite {
            self.db.publish_root(st.root.clone());
            drop(st);
            self.committed.set(true);
            return Ok(());
        }

        // Данные — до корня.
        match options {
            CommitOptions::FlushDataOnly | CommitOptions::FlushDataAndRoot => {
                self.db.flush_data()?;
            }
            _ => {}
        }

        let slot = self.batch_id % self.db.depth();
        {
            // SAFETY: слот кольца принадлежит писателю; читатели работают
            // с in-memory копией committed-корня.
            let page = unsafe { self.db.page_mut_raw(slot) };
            root_page_write(page, &st.root)?;
        }
        if options == CommitOptions::FlushDataAndRoot {
            self.db.flush_page(slot)?;
        }

        debug!(
            "batch {} committed: block {}, root {}, {} pages",
            self.batch_id, st.root.block_number, st.root.tree_root, st.root.page_count
        );
        self.db.publish_root(st.root.clone());
        drop(st);
        self.committed.set(true);
        Ok(())
    }
}

impl PageSource for WriteBatch {
    #[inline]
    fn page(&self, addr: u32) -> &[u8] {
        self.db.view(addr)
    }
}

impl Drop for WriteBatch {
    fn drop(&mut self) {
        // Незакоммиченный батч просто откатывается: watermark и корень
        // остаются прежними, его страницы не видны никому.
        if !self.committed.get() {
            debug!("batch {} rolled back", self.batch_id);
        }
        self.db.release_writer();
    }
}

/// Снапшот для чтения; живёт сколько угодно, но страницы старше окна
/// реорганизации могут быть переиспользованы более поздними батчами —
/// читатель не должен переживать max_reorg_depth коммитов.
pub struct ReadBatch {
    db: Arc<DbInner>,
    root: RootSnapshot,
}

impl ReadBatch {
    pub(crate) fn new(db: Arc<DbInner>) -> ReadBatch {
        let root = db.committed_root();
        ReadBatch { db, root }
    }

    /// (block_number, block_hash) снапшота.
    pub fn metadata(&self) -> (u32, H256) {
        (self.root.block_number, self.root.block_hash)
    }

    pub fn batch_id(&self) -> u32 {
        self.root.batch_id
    }

    pub fn try_get(&self, key_path: &NibblePath<'_>) -> Option<&[u8]> {
        tree_get(self, self.root.tree_root, key_path)
    }

    pub fn get_account(&self, address: &H256) -> Result<Account> {
        match self.try_get(&key::account_key(address).as_path()) {
            Some(data) => Account::read_from(data),
            None => Ok(Account::EMPTY),
        }
    }

    pub fn get_storage(&self, address: &H256, slot: &H256) -> U256 {
        match self.try_get(&key::storage_key(address, slot).as_path()) {
            Some(data) => storage_value_from_bytes(data),
            None => U256::zero(),
        }
    }

    /// Все живые пары с данным префиксом ключа.
    pub fn scan_prefix(&self, prefix: &NibblePath<'_>) -> Vec<(NibblePathBuf, Vec<u8>)> {
        tree_scan(self, self.root.tree_root, prefix)
    }

    /// Полный обход дерева.
    pub fn scan_all(&self) -> Vec<(NibblePathBuf, Vec<u8>)> {
        self.scan_prefix(&NibblePath::EMPTY)
    }
}

impl PageSource for ReadBatch {
    #[inline]
    fn page(&self, addr: u32) -> &[u8] {
        self.db.view(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{PAGE_SIZE, PAGE_TYPE_DATA};
    use crate::page::page_type;
    use crate::store::PagedDb;

    fn mem_db() -> PagedDb {
        PagedDb::open_memory(2, 256 * PAGE_SIZE).unwrap()
    }

    #[test]
    fn single_writer_enforced() {
        let db = mem_db();
        let b1 = db.begin_next().unwrap();
        assert!(db.begin_next().is_err());
        drop(b1);
        let b2 = db.begin_next().unwrap();
        assert_eq!(b2.id(), 1);
    }

    #[test]
    fn new_pages_grow_watermark() {
        let db = mem_db();
        let batch = db.begin_next().unwrap();
        let a = batch.get_new_page(true).unwrap();
        let b = batch.get_new_page(true).unwrap();
        // Кольцо занимает страницы 0..2, данные начинаются с 2.
        assert_eq!(a, 2);
        assert_eq!(b, 3);
        assert!(batch.was_written(a));
    }

    #[test]
    fn cow_registers_old_page() {
        let db = mem_db();

        // Батч 1: страница с данными, коммит.
        let batch = db.begin_next().unwrap();
        let addr = batch.get_new_page(true).unwrap();
        batch.page_mut(addr)[5] = PAGE_TYPE_DATA;
        batch.commit(CommitOptions::FlushDataAndRoot).unwrap();

        // Батч 2: CoW даёт новый адрес, содержимое перенесено.
        let batch = db.begin_next().unwrap();
        assert!(!batch.was_written(addr));
        let fresh = batch.ensure_writable(addr).unwrap();
        assert_ne!(fresh, addr);
        assert!(batch.was_written(fresh));
        assert_eq!(page_type(batch.page(fresh)), PAGE_TYPE_DATA);
        // Повторный ensure_writable копию не делает.
        assert_eq!(batch.ensure_writable(fresh).unwrap(), fresh);
    }

    #[test]
    fn abandoned_pages_reused_after_window() {
        let db = mem_db(); // depth = 2
        let mut freed = Vec::new();

        // Батч 1 бросает страницу.
        let batch = db.begin_next().unwrap();
        let addr = batch.get_new_page(true).unwrap();
        freed.push(addr);
        batch.register_for_future_reuse(addr).unwrap();
        batch.commit(CommitOptions::FlushDataAndRoot).unwrap();

        // Батчи 2 и 3 — пустые коммиты (двигаем окно).
        for _ in 0..2 {
            let b = db.begin_next().unwrap();
            b.commit(CommitOptions::FlushDataAndRoot).unwrap();
        }

        // Батч 4: current(4) - 1 > 2 — адрес (и страница его списка)
        // возвращаются в оборот.
        let batch = db.begin_next().unwrap();
        let got1 = batch.get_new_page(true).unwrap();
        let got2 = batch.get_new_page(true).unwrap();
        let reused = [got1, got2];
        assert!(
            reused.contains(&freed[0]),
            "freed page must come back: freed={:?}, got={:?}",
            freed,
            reused
        );
    }

    #[test]
    fn uncommitted_batch_rolls_back() {
        let db = mem_db();
        {
            let batch = db.begin_next().unwrap();
            batch.get_new_page(true).unwrap();
            batch.set_metadata(99, H256::repeat_byte(9));
            // drop без commit
        }
        let reader = db.begin_read_only();
        assert_eq!(reader.metadata().0, 0);
        // Следующий батч снова получает id 1 и тот же watermark.
        let batch = db.begin_next().unwrap();
        assert_eq!(batch.id(), 1);
        assert_eq!(batch.get_new_page(true).unwrap(), 2);
    }
}
