//! Production implementations of the `Clock` and `RandomSource` ports.

use chrono::{DateTime, Utc};
use rand::RngCore;

use crate::ports::{Clock, RandomSource};

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandomSource;

impl RandomSource for OsRandomSource {
    fn new_id(&self) -> uuid::Uuid {
        uuid::Uuid::new_v4()
    }

    fn token_bytes(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }
}
