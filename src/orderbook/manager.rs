//! Order book manager
//!
//! Registry of the actively tracked symbols. Each symbol's book sits behind
//! its own mutex; the registry lock is only held long enough to look up or
//! insert the per-symbol handle.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

use super::{OrderBookState, SymbolBook, VIEW_DEPTH};
use crate::error::{MarketDataError, Result};

/// One subscription of a symbol.
///
/// Unsubscribing and subscribing again creates a new book, so a lease taken
/// for the earlier subscription stops matching.
#[derive(Debug, Clone)]
pub struct Lease {
    symbol: String,
    book: Weak<Mutex<SymbolBook>>,
}

impl Lease {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn matches(&self, handle: &Arc<Mutex<SymbolBook>>) -> bool {
        self.book
            .upgrade()
            .map_or(false, |book| Arc::ptr_eq(&book, handle))
    }
}

type BookHandle = Arc<Mutex<SymbolBook>>;

/// Manages order books for multiple symbols
#[derive(Debug)]
pub struct OrderBookManager {
    books: RwLock<HashMap<String, BookHandle>>,
    view_depth: usize,
    max_symbols: usize,
    lock_timeout: Duration,
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new(VIEW_DEPTH, 50, Duration::from_secs(2))
    }
}

impl OrderBookManager {
    /// Create a new order book manager
    pub fn new(view_depth: usize, max_symbols: usize, lock_timeout: Duration) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            view_depth,
            max_symbols,
            lock_timeout,
        }
    }

    /// Start tracking `symbol`.
    ///
    /// Returns the lease of the new subscription, or `None` when the symbol
    /// was already tracked. Fails once `max_symbols` books exist.
    pub async fn subscribe(&self, symbol: &str) -> Result<Option<Lease>> {
        let mut books = self.books.write().await;
        if books.contains_key(symbol) {
            return Ok(None);
        }
        if books.len() >= self.max_symbols {
            return Err(MarketDataError::SubscriptionLimit {
                limit: self.max_symbols,
            });
        }

        let handle = Arc::new(Mutex::new(SymbolBook::new(symbol, self.view_depth)));
        let lease = Lease {
            symbol: symbol.to_string(),
            book: Arc::downgrade(&handle),
        };
        books.insert(symbol.to_string(), handle);
        Ok(Some(lease))
    }

    /// Stop tracking `symbol`; its workers notice on their next iteration
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        self.books.write().await.remove(symbol).is_some()
    }

    /// Whether `symbol` is in the active set
    pub async fn is_active(&self, symbol: &str) -> bool {
        self.books.read().await.contains_key(symbol)
    }

    /// Whether `lease` still names the current subscription of its symbol
    pub async fn holds(&self, lease: &Lease) -> bool {
        self.books
            .read()
            .await
            .get(&lease.symbol)
            .map_or(false, |handle| lease.matches(handle))
    }

    pub(crate) async fn handle(&self, symbol: &str) -> Option<BookHandle> {
        self.books.read().await.get(symbol).cloned()
    }

    /// Run `f` with exclusive access to the symbol's book.
    ///
    /// Returns `Ok(None)` for untracked symbols and
    /// [`MarketDataError::LockTimeout`] when the book cannot be locked in time.
    pub async fn with_book<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut SymbolBook) -> R,
    ) -> Result<Option<R>> {
        let Some(handle) = self.handle(symbol).await else {
            return Ok(None);
        };
        self.lock_and_run(symbol, handle, f).await
    }

    /// Like [`with_book`](Self::with_book), but only for the subscription
    /// `lease` was issued for; `Ok(None)` once it has been replaced or removed
    pub async fn with_leased<R>(
        &self,
        lease: &Lease,
        f: impl FnOnce(&mut SymbolBook) -> R,
    ) -> Result<Option<R>> {
        let handle = match self.handle(&lease.symbol).await {
            Some(handle) if lease.matches(&handle) => handle,
            _ => return Ok(None),
        };
        self.lock_and_run(&lease.symbol, handle, f).await
    }

    async fn lock_and_run<R>(
        &self,
        symbol: &str,
        handle: BookHandle,
        f: impl FnOnce(&mut SymbolBook) -> R,
    ) -> Result<Option<R>> {
        let mut book = timeout(self.lock_timeout, handle.lock())
            .await
            .map_err(|_| MarketDataError::LockTimeout {
                symbol: symbol.to_string(),
                waited_ms: self.lock_timeout.as_millis() as u64,
            })?;
        Ok(Some(f(&mut book)))
    }

    /// Get a copy of the state of a specific book
    pub async fn get_state(&self, symbol: &str) -> Result<Option<OrderBookState>> {
        self.with_book(symbol, |book| book.state().clone()).await
    }

    /// Get list of symbols being tracked
    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.books.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn len(&self) -> usize {
        self.books.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.books.read().await.is_empty()
    }

    pub fn max_symbols(&self) -> usize {
        self.max_symbols
    }
}
