use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use PaprikaDB::{Account, Blockchain, CommitOptions, PagedDb, PaprikaConfig, H256, U256};

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("paprika-{}-{}-{}", prefix, pid, t))
}

const DB_SIZE: u64 = 16 * 1024 * 1024;

#[test]
fn durable_commit_survives_reopen() -> Result<()> {
    let root = unique_root("recovery");
    fs::create_dir_all(&root)?;
    let path = root.join("state.pdb");

    let addr = H256::repeat_byte(0x77);

    // «Падение» процесса: пишем, коммитим durable, роняем хэндл без
    // какого-либо дополнительного закрытия.
    {
        let db = PagedDb::open_persistent(&path, 2, DB_SIZE)?;
        let chain = Blockchain::new(
            db,
            PaprikaConfig::default()
                .with_flush_window(Duration::from_millis(50))
                .with_commit_options(CommitOptions::FlushDataAndRoot),
        );
        let mut prev = H256::zero();
        for n in 1..=5u32 {
            let hash = H256::repeat_byte(n as u8);
            let mut b = chain.start_new(prev, hash, n);
            b.set_account(&addr, &Account::new(U256::from(n as u64 * 100), n as u64))?;
            b.set_storage(&addr, &H256::repeat_byte(0xA0), &U256::from(n as u64))?;
            b.commit()?;
            prev = hash;
        }
        chain.finalize(prev)?;
        chain.close()?;
    }

    // Reopen: recovery по root-кольцу.
    {
        let db = PagedDb::open_persistent(&path, 2, DB_SIZE)?;
        let reader = db.begin_read_only();
        assert_eq!(reader.metadata().0, 5);
        assert_eq!(reader.metadata().1, H256::repeat_byte(5));
        assert_eq!(
            reader.get_account(&addr)?,
            Account::new(U256::from(500u64), 5)
        );
        assert_eq!(
            reader.get_storage(&addr, &H256::repeat_byte(0xA0)),
            U256::from(5u64)
        );
    }

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn torn_root_write_falls_back_to_previous_batch() -> Result<()> {
    let root = unique_root("torn-root");
    fs::create_dir_all(&root)?;
    let path = root.join("state.pdb");

    let addr = H256::repeat_byte(0x31);

    {
        let db = PagedDb::open_persistent(&path, 3, DB_SIZE)?;
        for n in 1..=2u32 {
            let batch = db.begin_next()?;
            batch.set_raw(
                &PaprikaDB::key::account_key(&addr).as_path(),
                &[n as u8; 4],
            )?;
            batch.set_metadata(n, H256::repeat_byte(n as u8));
            batch.commit(CommitOptions::FlushDataAndRoot)?;
        }
    }

    // Портим слот корня батча 2 (страница 2 mod 3) — имитация рваной записи.
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = fs::OpenOptions::new().write(true).open(&path)?;
        f.seek(SeekFrom::Start(2 * 4096 + 100))?;
        f.write_all(&[0xFF; 8])?;
        f.sync_all()?;
    }

    {
        let db = PagedDb::open_persistent(&path, 3, DB_SIZE)?;
        let reader = db.begin_read_only();
        // Recovery откатился на батч 1.
        assert_eq!(reader.metadata().0, 1);
        let got = reader
            .try_get(&PaprikaDB::key::account_key(&addr).as_path())
            .expect("state of batch 1");
        assert_eq!(got, &[1u8; 4]);
    }

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn second_open_is_locked_out() -> Result<()> {
    let root = unique_root("lock");
    fs::create_dir_all(&root)?;
    let path = root.join("state.pdb");

    let db = PagedDb::open_persistent(&path, 2, DB_SIZE)?;
    assert!(PagedDb::open_persistent(&path, 2, DB_SIZE).is_err());
    drop(db);
    // После освобождения — можно.
    let _db = PagedDb::open_persistent(&path, 2, DB_SIZE)?;

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
