//! Blockchain overlay: in-memory block states over the last flushed root.
//!
//! Несколько конкурентных блоков (включая форки) живут в памяти цепочками
//! от последнего сброшенного снапшота БД. Чтение идёт по цепочке предков
//! (bloom отсекает блоки без ключа) и, упёршись в отсутствующего родителя,
//! падает в текущий db_reader. finalize ставит блок и его несброшенных
//! предков в SPSC-канал; одиночный flusher-поток сливает их батчами в
//! PagedDb и отдаёт обратно пары (новый read-снапшот, номера сброшенных
//! блоков) — они применяются при следующем публичном вызове (ротация
//! db_reader, возврат страниц пула). Поэтому выселение сброшенного предка
//! не ломает чтения открытых блоков: данные находятся в ротированном
//! снапшоте.
//!
//! Мутирующий API снаружи однопоточный; единственные межпоточные связи —
//! два канала выше.

pub mod bloom;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use primitive_types::{H256, U256};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crate::account::{storage_value_from_bytes, storage_value_to_bytes, Account};
use crate::chain::bloom::BloomFilter;
use crate::config::PaprikaConfig;
use crate::hash::hash64;
use crate::key;
use crate::metrics::{record_bloom_test, record_flush_batch};
use crate::nibble::NibblePath;
use crate::pool::{PagePool, PooledPage};
use crate::slotted::{sa_init, sa_list, sa_try_get, sa_try_set};
use crate::store::{CommitOptions, PagedDb, ReadBatch, WriteBatch};

/// Стабильный хэш ключа для bloom-бит (длина + упакованные нибблы).
fn bloom_hash(path: &NibblePath<'_>) -> u64 {
    let mut buf = [0u8; 67];
    buf[0] = path.len() as u8;
    let n = path.copy_packed(&mut buf[1..]);
    hash64(&buf[..1 + n])
}

/// Закоммиченный блок: карты заморожены, читается по Arc из индексов и
/// flusher-а. Последний Drop возвращает страницы в пул.
struct CommittedBlock {
    hash: H256,
    parent_hash: H256,
    number: u32,
    bloom: BloomFilter,
    maps: Vec<PooledPage>,
}

impl CommittedBlock {
    /// Скан собственных карт, новые раньше старых. Пустое значение —
    /// tombstone, он тоже результат.
    fn lookup_raw(&self, path: &NibblePath<'_>) -> Option<Vec<u8>> {
        for map in self.maps.iter().rev() {
            if let Some(v) = sa_try_get(&map[..], path) {
                return Some(v.to_vec());
            }
        }
        None
    }
}

struct Flushed {
    reader: ReadBatch,
    numbers: Vec<u32>,
}

struct ChainState {
    by_hash: HashMap<H256, Arc<CommittedBlock>>,
    by_number: HashMap<u32, Vec<Arc<CommittedBlock>>>,
    last_finalized: u32,
    reader: Arc<ReadBatch>,
}

pub struct Blockchain {
    db: PagedDb,
    pool: Arc<PagePool>,
    state: Mutex<ChainState>,
    finalized_tx: Option<Sender<Arc<CommittedBlock>>>,
    flushed_rx: Receiver<Flushed>,
    flusher: Option<JoinHandle<()>>,
}

impl Blockchain {
    pub fn new(db: PagedDb, cfg: PaprikaConfig) -> Blockchain {
        let pool = PagePool::new(cfg.pool_pages, cfg.pool_max_pages);
        let reader = db.begin_read_only();
        let last_finalized = reader.metadata().0;

        // Оба канала неограниченные: finalize никогда не блокируется на
        // отставшем flusher-е, очередь выравнивается окном батчирования.
        let (finalized_tx, finalized_rx) = mpsc::channel();
        let (flushed_tx, flushed_rx) = mpsc::channel();

        let flusher_db = db.clone();
        let window = cfg.flush_window;
        let commit = cfg.commit_options;
        let flusher = std::thread::Builder::new()
            .name("paprika-flusher".to_string())
            .spawn(move || flusher_loop(flusher_db, finalized_rx, flushed_tx, window, commit))
            .expect("spawn flusher thread");

        info!(
            "blockchain started at block {} ({})",
            last_finalized, cfg
        );

        Blockchain {
            db,
            pool,
            state: Mutex::new(ChainState {
                by_hash: HashMap::new(),
                by_number: HashMap::new(),
                last_finalized,
                reader: Arc::new(reader),
            }),
            finalized_tx: Some(finalized_tx),
            flushed_rx,
            flusher: Some(flusher),
        }
    }

    /// Применить накопленные результаты flusher-а: ротация db_reader и
    /// выселение сброшенных блоков (их страницы вернутся в пул).
    fn reconcile(&self) {
        let mut st = self.state.lock().expect("chain lock poisoned");
        while let Ok(flushed) = self.flushed_rx.try_recv() {
            st.reader = Arc::new(flushed.reader);
            for number in flushed.numbers {
                if let Some(blocks) = st.by_number.remove(&number) {
                    for b in blocks {
                        st.by_hash.remove(&b.hash);
                    }
                }
            }
        }
    }

    /// Начать новый блок поверх `parent_hash`. Родителя может не быть в
    /// памяти — тогда чтения падают сразу в текущий снапшот БД.
    pub fn start_new(&self, parent_hash: H256, block_hash: H256, block_number: u32) -> PendingBlock<'_> {
        self.reconcile();
        PendingBlock {
            chain: self,
            hash: block_hash,
            parent_hash,
            number: block_number,
            bloom: BloomFilter::new(),
            maps: Vec::new(),
        }
    }

    /// Финализировать блок: он и его несброшенные предки уходят flusher-у
    /// в хронологическом порядке.
    pub fn finalize(&self, block_hash: H256) -> Result<()> {
        self.reconcile();

        let to_flush = {
            let mut st = self.state.lock().expect("chain lock poisoned");
            let block = st
                .by_hash
                .get(&block_hash)
                .cloned()
                .ok_or_else(|| anyhow!("finalize: unknown block {:x}", block_hash))?;
            if block.number <= st.last_finalized {
                return Err(anyhow!(
                    "finalize: block {} is not above last finalized {}",
                    block.number,
                    st.last_finalized
                ));
            }

            let mut chain = vec![block.clone()];
            let mut parent = block.parent_hash;
            loop {
                match st.by_hash.get(&parent) {
                    Some(b) if b.number > st.last_finalized => {
                        chain.push(b.clone());
                        parent = b.parent_hash;
                    }
                    _ => break,
                }
            }
            st.last_finalized = block.number;
            chain.reverse();
            chain
        };

        let tx = self
            .finalized_tx
            .as_ref()
            .ok_or_else(|| anyhow!("blockchain is closed"))?;
        for b in to_flush {
            debug!("finalize: queueing block {} ({:x})", b.number, b.hash);
            tx.send(b).map_err(|_| anyhow!("flusher is gone"))?;
        }
        Ok(())
    }

    pub fn db(&self) -> &PagedDb {
        &self.db
    }

    /// Номер последнего финализированного блока.
    pub fn last_finalized(&self) -> u32 {
        self.state.lock().expect("chain lock poisoned").last_finalized
    }

    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    /// Остановка: закрыть канал, дождаться flusher-а, применить остатки.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        drop(self.finalized_tx.take());
        if let Some(handle) = self.flusher.take() {
            handle
                .join()
                .map_err(|_| anyhow!("flusher thread panicked"))?;
        }
        self.reconcile();
        Ok(())
    }

    fn lookup_through(
        &self,
        start_parent: H256,
        path: &NibblePath<'_>,
        key_hash: u64,
    ) -> Option<Vec<u8>> {
        let mut cursor = start_parent;
        loop {
            // Родителя нет в памяти (не было или уже сброшен и выселен) —
            // падаем в ТЕКУЩИЙ db_reader: flusher мог ротировать его после
            // старта блока, и только свежий снапшот содержит сброшенных
            // предков.
            let (block, reader) = {
                let st = self.state.lock().expect("chain lock poisoned");
                (st.by_hash.get(&cursor).cloned(), st.reader.clone())
            };
            let block = match block {
                Some(b) => b,
                None => return reader.try_get(path).map(|v| v.to_vec()),
            };
            let maybe = block.bloom.may_contain(key_hash);
            record_bloom_test(!maybe);
            if maybe {
                if let Some(v) = block.lookup_raw(path) {
                    return Some(v);
                }
            }
            cursor = block.parent_hash;
        }
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        if self.flusher.is_some() {
            if let Err(e) = self.shutdown() {
                error!("blockchain shutdown: {e:#}");
            }
        }
    }
}

/// Незакоммиченный блок — единственный мутабельный хэндл.
pub struct PendingBlock<'c> {
    chain: &'c Blockchain,
    hash: H256,
    parent_hash: H256,
    number: u32,
    bloom: BloomFilter,
    maps: Vec<PooledPage>,
}

impl PendingBlock<'_> {
    pub fn hash(&self) -> H256 {
        self.hash
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Сырая запись: пустое значение — удаление ключа.
    pub fn set_raw(&mut self, path: &NibblePath<'_>, value: &[u8]) -> Result<()> {
        self.bloom.set(bloom_hash(path));

        if let Some(map) = self.maps.last_mut() {
            if sa_try_set(&mut map[..], path, value) {
                return Ok(());
            }
        }
        // Текущая карта полна (или её нет) — арендуем свежую страницу.
        let mut page = self
            .chain
            .pool
            .rent()
            .context("rent page for block map")?;
        sa_init(&mut page[..]);
        if !sa_try_set(&mut page[..], path, value) {
            return Err(anyhow!(
                "entry too large for a block map page ({} value bytes)",
                value.len()
            ));
        }
        self.maps.push(page);
        Ok(())
    }

    /// Чтение с учётом собственных записей, предков и снапшота БД.
    /// Пустое значение (tombstone) означает «удалено» и даёт None.
    pub fn try_get(&self, path: &NibblePath<'_>) -> Option<Vec<u8>> {
        self.lookup(path).filter(|v| !v.is_empty())
    }

    fn lookup(&self, path: &NibblePath<'_>) -> Option<Vec<u8>> {
        let h = bloom_hash(path);

        // Собственные записи видны сразу.
        if self.bloom.may_contain(h) {
            for map in self.maps.iter().rev() {
                if let Some(v) = sa_try_get(&map[..], path) {
                    return Some(v.to_vec());
                }
            }
        }
        self.chain.lookup_through(self.parent_hash, path, h)
    }

    pub fn get_account(&self, address: &H256) -> Result<Account> {
        match self.lookup(&key::account_key(address).as_path()) {
            Some(data) => Account::read_from(&data),
            None => Ok(Account::EMPTY),
        }
    }

    /// Пустой аккаунт удаляется из дерева.
    pub fn set_account(&mut self, address: &H256, account: &Account) -> Result<()> {
        let mut payload = Vec::new();
        account.write_to(&mut payload);
        self.set_raw(&key::account_key(address).as_path(), &payload)
    }

    pub fn get_storage(&self, address: &H256, slot: &H256) -> U256 {
        match self.lookup(&key::storage_key(address, slot).as_path()) {
            Some(data) => storage_value_from_bytes(&data),
            None => U256::zero(),
        }
    }

    pub fn set_storage(&mut self, address: &H256, slot: &H256, value: &U256) -> Result<()> {
        let mut payload = Vec::new();
        storage_value_to_bytes(value, &mut payload);
        self.set_raw(&key::storage_key(address, slot).as_path(), &payload)
    }

    /// Зафиксировать блок в индексах цепочки. Карты замораживаются; блок
    /// живёт, пока его не сбросит flusher (или пока не закроется цепочка).
    pub fn commit(self) -> Result<()> {
        let block = Arc::new(CommittedBlock {
            hash: self.hash,
            parent_hash: self.parent_hash,
            number: self.number,
            bloom: self.bloom,
            maps: self.maps,
        });
        let mut st = self.chain.state.lock().expect("chain lock poisoned");
        if st.by_hash.contains_key(&block.hash) {
            return Err(anyhow!("block {:x} already committed", block.hash));
        }
        st.by_hash.insert(block.hash, block.clone());
        st.by_number.entry(block.number).or_default().push(block);
        Ok(())
    }
}

// ---------------- flusher ----------------

fn flusher_loop(
    db: PagedDb,
    rx: Receiver<Arc<CommittedBlock>>,
    out: Sender<Flushed>,
    window: std::time::Duration,
    commit: CommitOptions,
) {
    // recv() сам дренирует канал после закрытия отправителя.
    while let Ok(first) = rx.recv() {
        if let Err(e) = flush_round(&db, &rx, first, &out, window, commit) {
            // Батч откатился; стор консистентен на последнем корне.
            error!("flusher: {e:#}");
            break;
        }
    }
    debug!("flusher: channel closed, exiting");
}

fn flush_round(
    db: &PagedDb,
    rx: &Receiver<Arc<CommittedBlock>>,
    first: Arc<CommittedBlock>,
    out: &Sender<Flushed>,
    window: std::time::Duration,
    commit: CommitOptions,
) -> Result<()> {
    let batch = db.begin_next()?;
    let deadline = Instant::now() + window;
    let mut numbers = Vec::new();

    let mut block = Some(first);
    while let Some(b) = block.take() {
        apply_block(&batch, &b)?;
        numbers.push(b.number);
        if Instant::now() >= deadline {
            break;
        }
        if let Ok(next) = rx.try_recv() {
            block = Some(next);
        }
    }

    batch.commit(commit)?;
    record_flush_batch(numbers.len() as u64);
    debug!("flusher: committed {} block(s)", numbers.len());

    // Получателя может уже не быть (shutdown) — это не ошибка.
    let _ = out.send(Flushed {
        reader: db.begin_read_only(),
        numbers,
    });
    Ok(())
}

/// Применить карты блока к батчу, старые раньше новых — последняя запись
/// ключа побеждает.
fn apply_block(batch: &WriteBatch, block: &CommittedBlock) -> Result<()> {
    batch.set_metadata(block.number, block.hash);
    for map in &block.maps {
        for e in sa_list(&map[..]) {
            batch.set_raw(&e.key.as_path(), &e.value)?;
        }
    }
    Ok(())
}
