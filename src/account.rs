//! Account state and its compact on-page codec.
//!
//! Кодировка (LE не нужна — числа пишутся big-endian без ведущих нулей):
//! [blen u8][balance BE, blen байт][nlen u8][nonce BE, nlen байт]
//! Пустой аккаунт (balance == 0 && nonce == 0) кодируется пустым слайсом —
//! на уровне дерева пустое значение означает удаление.

use anyhow::{anyhow, Result};
use primitive_types::U256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u64,
}

impl Account {
    pub const EMPTY: Account = Account {
        balance: U256::zero(),
        nonce: 0,
    };

    pub fn new(balance: U256, nonce: u64) -> Self {
        Self { balance, nonce }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0
    }

    /// Сериализация в `out`. Пустой аккаунт не пишет ни байта.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        if self.is_empty() {
            return;
        }
        let mut be = [0u8; 32];
        self.balance.to_big_endian(&mut be);
        let skip = be.iter().take_while(|b| **b == 0).count();
        let balance = &be[skip.min(31)..];
        out.push(balance.len() as u8);
        out.extend_from_slice(balance);

        let nb = self.nonce.to_be_bytes();
        let skip = nb.iter().take_while(|b| **b == 0).count();
        let nonce = &nb[skip.min(7)..];
        out.push(nonce.len() as u8);
        out.extend_from_slice(nonce);
    }

    pub fn read_from(data: &[u8]) -> Result<Account> {
        if data.is_empty() {
            return Ok(Account::EMPTY);
        }
        let blen = data[0] as usize;
        if data.len() < 1 + blen + 1 {
            return Err(anyhow!("account payload truncated (len={})", data.len()));
        }
        let balance = U256::from_big_endian(&data[1..1 + blen]);
        let nlen = data[1 + blen] as usize;
        if nlen > 8 || data.len() < 2 + blen + nlen {
            return Err(anyhow!("account nonce truncated (len={})", data.len()));
        }
        let mut nb = [0u8; 8];
        nb[8 - nlen..].copy_from_slice(&data[2 + blen..2 + blen + nlen]);
        Ok(Account {
            balance,
            nonce: u64::from_be_bytes(nb),
        })
    }
}

/// Storage-значение: U256 <-> BE-байты без ведущих нулей.
pub fn storage_value_to_bytes(value: &U256, out: &mut Vec<u8>) {
    if value.is_zero() {
        return;
    }
    let mut be = [0u8; 32];
    value.to_big_endian(&mut be);
    let skip = be.iter().take_while(|b| **b == 0).count();
    out.extend_from_slice(&be[skip..]);
}

pub fn storage_value_from_bytes(data: &[u8]) -> U256 {
    if data.is_empty() {
        U256::zero()
    } else {
        U256::from_big_endian(data)
    }
}
