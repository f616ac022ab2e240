use anyhow::Result;
use std::time::Duration;

use PaprikaDB::{Account, Blockchain, PagedDb, PaprikaConfig, H256, U256};

fn h256_of(rng: &mut oorandom::Rand64) -> H256 {
    let mut bytes = [0u8; 32];
    for chunk in bytes.chunks_mut(8) {
        chunk.copy_from_slice(&rng.rand_u64().to_le_bytes());
    }
    H256::from(bytes)
}

// Линейная цепочка: много блоков, в каждом пачка аккаунтов со storage,
// финализация каждые K блоков. После close() БД обязана отдать все
// последние значения.
#[test]
fn many_blocks_many_accounts_roundtrip() -> Result<()> {
    const BLOCKS: u32 = 48;
    const ACCOUNTS_PER_BLOCK: usize = 40;
    const FINALIZE_EVERY: u32 = 8;

    let db = PagedDb::open_memory(2, 64 * 1024 * 1024)?;
    let chain = Blockchain::new(
        db.clone(),
        PaprikaConfig::default()
            .with_flush_window(Duration::from_millis(20))
            .with_pool_pages(256),
    );

    let mut rng = oorandom::Rand64::new(0xC0FF_EE00);
    let mut expected: Vec<(H256, Account, H256, U256)> = Vec::new();

    let mut parent = H256::zero();
    for n in 1..=BLOCKS {
        let hash = {
            let mut b = [0u8; 32];
            b[..4].copy_from_slice(&n.to_le_bytes());
            b[31] = 0xBB;
            H256::from(b)
        };
        let mut block = chain.start_new(parent, hash, n);
        for _ in 0..ACCOUNTS_PER_BLOCK {
            let addr = h256_of(&mut rng);
            let account = Account::new(U256::from(rng.rand_u64()), rng.rand_u64());
            let slot = h256_of(&mut rng);
            let value = U256::from(rng.rand_u64());

            block.set_account(&addr, &account)?;
            block.set_storage(&addr, &slot, &value)?;
            expected.push((addr, account, slot, value));
        }
        block.commit()?;
        if n % FINALIZE_EVERY == 0 {
            chain.finalize(hash)?;
        }
        parent = hash;
    }
    // Хвост цепочки тоже финализируем.
    chain.finalize(parent)?;
    chain.close()?;

    let reader = db.begin_read_only();
    assert_eq!(reader.metadata().0, BLOCKS);
    for (addr, account, slot, value) in &expected {
        assert_eq!(reader.get_account(addr)?, *account, "account {addr:x}");
        assert_eq!(reader.get_storage(addr, slot), *value, "slot of {addr:x}");
    }
    Ok(())
}

// Повторные перезаписи одного множества ключей: выигрывает последняя
// запись, а БД не распухает бесконтрольно (abandoned-страницы
// возвращаются в оборот).
#[test]
fn rewrites_converge_to_last_value() -> Result<()> {
    const ROUNDS: u32 = 30;
    const KEYS: usize = 64;

    let db = PagedDb::open_memory(2, 32 * 1024 * 1024)?;
    let chain = Blockchain::new(
        db.clone(),
        PaprikaConfig::default()
            .with_flush_window(Duration::from_millis(20))
            .with_pool_pages(128),
    );

    let addrs: Vec<H256> = (0..KEYS).map(|i| H256::repeat_byte(i as u8)).collect();

    let mut parent = H256::zero();
    for n in 1..=ROUNDS {
        let hash = {
            let mut b = [0u8; 32];
            b[..4].copy_from_slice(&n.to_le_bytes());
            b[31] = 0xCC;
            H256::from(b)
        };
        let mut block = chain.start_new(parent, hash, n);
        for (i, addr) in addrs.iter().enumerate() {
            block.set_account(
                addr,
                &Account::new(U256::from(n as u64 * 1000 + i as u64), n as u64),
            )?;
        }
        block.commit()?;
        chain.finalize(hash)?;
        parent = hash;
    }
    chain.close()?;

    let reader = db.begin_read_only();
    for (i, addr) in addrs.iter().enumerate() {
        assert_eq!(
            reader.get_account(addr)?,
            Account::new(U256::from(ROUNDS as u64 * 1000 + i as u64), ROUNDS as u64)
        );
    }
    Ok(())
}
