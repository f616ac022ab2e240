//! Process-private page pool for in-memory block state.
//!
//! Блоки overlay-а держат свои slotted-карты в страницах этого пула, а не в
//! paged store. Пул преаллоцирует `prealloc` страниц и растёт по
//! требованию до опционального потолка; достижение потолка — ошибка
//! (вызывающему остаётся дождаться возврата страниц flusher-ом или
//! увеличить лимит).
//!
//! PooledPage возвращает страницу в пул на Drop, так что блок, умирая,
//! отдаёт свои страницы автоматически.

use anyhow::{anyhow, Result};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::consts::PAGE_SIZE;
use crate::metrics::{record_pool_rented, record_pool_returned};

struct PoolInner {
    free: Vec<Box<[u8; PAGE_SIZE]>>,
    total: usize,
}

pub struct PagePool {
    inner: Mutex<PoolInner>,
    max_pages: Option<usize>,
}

impl PagePool {
    pub fn new(prealloc: usize, max_pages: Option<usize>) -> Arc<PagePool> {
        let mut free = Vec::with_capacity(prealloc);
        for _ in 0..prealloc {
            free.push(Box::new([0u8; PAGE_SIZE]));
        }
        Arc::new(PagePool {
            inner: Mutex::new(PoolInner {
                free,
                total: prealloc,
            }),
            max_pages,
        })
    }

    /// Арендовать обнулённую страницу.
    pub fn rent(self: &Arc<Self>) -> Result<PooledPage> {
        let mut g = self.inner.lock().expect("pool lock poisoned");
        let buf = match g.free.pop() {
            Some(mut page) => {
                for b in page.iter_mut() {
                    *b = 0;
                }
                page
            }
            None => {
                if let Some(max) = self.max_pages {
                    if g.total >= max {
                        return Err(anyhow!(
                            "page pool exhausted ({} pages, max {})",
                            g.total,
                            max
                        ));
                    }
                }
                g.total += 1;
                Box::new([0u8; PAGE_SIZE])
            }
        };
        drop(g);
        record_pool_rented();
        Ok(PooledPage {
            buf: Some(buf),
            pool: self.clone(),
        })
    }

    fn give_back(&self, page: Box<[u8; PAGE_SIZE]>) {
        let mut g = self.inner.lock().expect("pool lock poisoned");
        g.free.push(page);
        record_pool_returned();
    }

    pub fn free_pages(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").free.len()
    }

    pub fn total_pages(&self) -> usize {
        self.inner.lock().expect("pool lock poisoned").total
    }
}

/// RAII-страница пула.
pub struct PooledPage {
    buf: Option<Box<[u8; PAGE_SIZE]>>,
    pool: Arc<PagePool>,
}

impl Deref for PooledPage {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf.as_ref().expect("page taken")[..]
    }
}

impl DerefMut for PooledPage {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf.as_mut().expect("page taken")[..]
    }
}

impl Drop for PooledPage {
    fn drop(&mut self) {
        if let Some(page) = self.buf.take() {
            self.pool.give_back(page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_and_auto_return() {
        let pool = PagePool::new(2, Some(2));
        assert_eq!(pool.free_pages(), 2);
        {
            let a = pool.rent().unwrap();
            let _b = pool.rent().unwrap();
            assert_eq!(pool.free_pages(), 0);
            assert_eq!(a.len(), PAGE_SIZE);
            // Потолок достигнут.
            assert!(pool.rent().is_err());
        }
        // Страницы вернулись на Drop.
        assert_eq!(pool.free_pages(), 2);
    }

    #[test]
    fn grows_without_cap() {
        let pool = PagePool::new(1, None);
        let _a = pool.rent().unwrap();
        let _b = pool.rent().unwrap();
        assert_eq!(pool.total_pages(), 2);
    }

    #[test]
    fn rented_pages_are_zeroed() {
        let pool = PagePool::new(1, None);
        {
            let mut p = pool.rent().unwrap();
            p[0] = 0xFF;
            p[PAGE_SIZE - 1] = 0xEE;
        }
        let p = pool.rent().unwrap();
        assert_eq!(p[0], 0);
        assert_eq!(p[PAGE_SIZE - 1], 0);
    }
}
