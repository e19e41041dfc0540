//! Persistence of absence requests with optimistic compare-and-swap updates
use super::absence::AbsenceRequest;
use super::error::AbsenceError;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Transactional, Tree};

const REQUESTS_TREE: &str = "absence_requests";
const REQUESTER_INDEX_TREE: &str = "absence_by_requester";

/// A request together with the exact bytes it was decoded from. The bytes are
/// the expected value of the next compare-and-swap.
#[derive(Debug, Clone)]
pub struct Versioned {
    pub request: AbsenceRequest,
    raw: Vec<u8>,
}

impl Versioned {
    pub fn new(request: AbsenceRequest, raw: Vec<u8>) -> Self {
        Self { request, raw }
    }
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapOutcome {
    Swapped,
    /// Someone else wrote the record since it was read.
    Conflict,
}

pub trait RequestStore: Send + Sync {
    /// Stores a brand new request. Fails if the id is taken.
    fn insert(&self, request: &AbsenceRequest) -> Result<(), AbsenceError>;
    fn load(&self, id: &str) -> Result<Option<Versioned>, AbsenceError>;
    /// Replaces `current` with `next` only if the stored bytes still equal `current`.
    fn swap(&self, current: &Versioned, next: &AbsenceRequest) -> Result<SwapOutcome, AbsenceError>;
    /// Ids of every request filed by `requester`, oldest first.
    fn ids_for_requester(&self, requester: &str) -> Result<Vec<String>, AbsenceError>;
}

pub struct SledStore {
    requests: Tree,
    by_requester: Tree,
}

impl SledStore {
    pub fn open(db: &sled::Db) -> Result<Self, AbsenceError> {
        Ok(Self {
            requests: db.open_tree(REQUESTS_TREE)?,
            by_requester: db.open_tree(REQUESTER_INDEX_TREE)?,
        })
    }
}

fn index_key(requester: &str, id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(requester.len() + id.len() + 1);
    key.extend_from_slice(requester.as_bytes());
    key.push(0);
    key.extend_from_slice(id.as_bytes());
    key
}

impl RequestStore for SledStore {
    fn insert(&self, request: &AbsenceRequest) -> Result<(), AbsenceError> {
        let cbor = request.encode()?;
        let key = index_key(&request.requester, &request.id);

        // record and index land together or not at all
        (&self.requests, &self.by_requester)
            .transaction(|(requests, index)| {
                if requests.get(request.id.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(
                        AbsenceError::ConcurrencyConflict {
                            id: request.id.clone(),
                            attempts: 1,
                        },
                    ));
                }
                requests.insert(request.id.as_bytes(), cbor.as_slice())?;
                index.insert(key.as_slice(), request.id.as_bytes())?;
                Ok(())
            })
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => AbsenceError::Storage(err),
            })
    }

    fn load(&self, id: &str) -> Result<Option<Versioned>, AbsenceError> {
        match self.requests.get(id.as_bytes())? {
            Some(bytes) => {
                let request = AbsenceRequest::decode(&bytes)?;
                Ok(Some(Versioned::new(request, bytes.to_vec())))
            }
            None => Ok(None),
        }
    }

    fn swap(
        &self,
        current: &Versioned,
        next: &AbsenceRequest,
    ) -> Result<SwapOutcome, AbsenceError> {
        let cbor = next.encode()?;
        let outcome = self.requests.compare_and_swap(
            current.request.id.as_bytes(),
            Some(current.raw()),
            Some(cbor),
        )?;

        Ok(match outcome {
            Ok(()) => SwapOutcome::Swapped,
            Err(_) => SwapOutcome::Conflict,
        })
    }

    fn ids_for_requester(&self, requester: &str) -> Result<Vec<String>, AbsenceError> {
        let mut prefix = requester.as_bytes().to_vec();
        prefix.push(0);

        let mut ids = vec![];
        for entry in self.by_requester.scan_prefix(prefix) {
            let (_, id) = entry?;
            ids.push(String::from_utf8_lossy(&id).into_owned());
        }
        Ok(ids)
    }
}
