//! Reassembly of chunked uploads.
//!
//! Large exports arrive as numbered pieces over independent requests, in any order and possibly
//! more than once. Pieces are buffered per `(user, upload id)` until every index is present; the
//! concatenation is then written once to object storage. Sessions live in process memory, so all
//! pieces of one upload must reach the same instance.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{Arc, Mutex, MutexGuard},
	time::{Duration, Instant},
};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use persona_config::Upload;

use crate::{Error, PersonaService, Result};

const UPLOAD_FILE_NAME: &str = "conversations.json";

#[derive(Debug, Clone)]
pub struct ChunkUpload<'a> {
	pub user_id: &'a str,
	pub upload_id: &'a str,
	pub chunk_index: u32,
	pub total_chunks: u32,
	pub total_size_hint: Option<u64>,
	pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReceipt {
	pub complete: bool,
	pub received: u32,
	pub total: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub size: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub digest: Option<String>,
}
impl ChunkReceipt {
	fn pending(received: usize, total: u32) -> Self {
		Self { complete: false, received: received as u32, total, path: None, size: None, digest: None }
	}
}

type SessionKey = (String, String);

#[derive(Debug)]
struct Session {
	total_chunks: u32,
	size_hint: Option<u64>,
	buffers: BTreeMap<u32, Vec<u8>>,
	buffered_bytes: u64,
	last_seen: Instant,
	finalizing: bool,
}

#[derive(Debug)]
struct Completed {
	receipt: ChunkReceipt,
	completed_at: Instant,
}

#[derive(Debug, Default)]
struct Sessions {
	open: HashMap<SessionKey, Session>,
	completed: HashMap<SessionKey, Completed>,
}
impl Sessions {
	/// Drops idle sessions and stale completion receipts. Returns how many sessions were dropped.
	fn evict_expired(&mut self, now: Instant, ttl: Duration) -> usize {
		let before = self.open.len();

		self.open.retain(|_, session| now.saturating_duration_since(session.last_seen) < ttl);
		self.completed.retain(|_, done| now.saturating_duration_since(done.completed_at) < ttl);

		before - self.open.len()
	}
}

enum Accepted {
	Receipt(ChunkReceipt),
	Finalize { bytes: Vec<u8>, total: u32 },
}

pub struct Reassembler {
	cfg: Upload,
	sessions: Mutex<Sessions>,
}
impl Reassembler {
	pub fn new(cfg: Upload) -> Self {
		Self { cfg, sessions: Mutex::new(Sessions::default()) }
	}

	/// Number of uploads still being assembled.
	pub fn open_sessions(&self) -> usize {
		self.lock().open.len()
	}

	/// Evicts sessions idle for longer than the session TTL.
	pub fn evict_expired(&self, now: Instant) -> usize {
		let ttl = self.ttl();

		self.lock().evict_expired(now, ttl)
	}

	fn lock(&self) -> MutexGuard<'_, Sessions> {
		self.sessions.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn ttl(&self) -> Duration {
		Duration::from_secs(self.cfg.session_ttl_seconds)
	}

	fn accept(&self, key: &SessionKey, chunk: &ChunkUpload<'_>, now: Instant) -> Result<Accepted> {
		self.validate(chunk)?;

		let ttl = self.ttl();
		let mut sessions = self.lock();

		sessions.evict_expired(now, ttl);

		if let Some(done) = sessions.completed.get(key) {
			return Ok(Accepted::Receipt(done.receipt.clone()));
		}

		let held: u64 = sessions.open.values().map(|session| session.buffered_bytes).sum();

		let session = sessions.open.entry(key.clone()).or_insert_with(|| Session {
			total_chunks: chunk.total_chunks,
			size_hint: chunk.total_size_hint,
			buffers: BTreeMap::new(),
			buffered_bytes: 0,
			last_seen: now,
			finalizing: false,
		});

		if session.total_chunks != chunk.total_chunks {
			return Err(Error::InvalidRequest {
				message: format!(
					"Upload {} was started with {} chunks, not {}.",
					chunk.upload_id, session.total_chunks, chunk.total_chunks
				),
			});
		}

		let replaced = session.buffers.get(&chunk.chunk_index).map_or(0, |b| b.len() as u64);
		let buffered = session.buffered_bytes - replaced + chunk.bytes.len() as u64;

		if buffered > self.cfg.max_upload_bytes {
			return Err(Error::InvalidRequest {
				message: format!(
					"Upload {} exceeds the {} byte limit.",
					chunk.upload_id, self.cfg.max_upload_bytes
				),
			});
		}
		if held - session.buffered_bytes + buffered > self.cfg.max_buffered_bytes {
			return Err(Error::Busy {
				message: "Too many uploads are in progress. Try again later.".to_string(),
			});
		}

		session.last_seen = now;

		if chunk.total_size_hint.is_some() {
			session.size_hint = chunk.total_size_hint;
		}

		// A resend during finalization must not replace bytes that are being written.
		if session.finalizing {
			return Ok(Accepted::Receipt(ChunkReceipt::pending(
				session.buffers.len(),
				session.total_chunks,
			)));
		}

		session.buffers.insert(chunk.chunk_index, chunk.bytes.clone());
		session.buffered_bytes = buffered;

		if session.buffers.len() < session.total_chunks as usize {
			return Ok(Accepted::Receipt(ChunkReceipt::pending(
				session.buffers.len(),
				session.total_chunks,
			)));
		}

		session.finalizing = true;

		if let Some(hint) = session.size_hint
			&& hint != session.buffered_bytes
		{
			tracing::warn!(
				upload_id = chunk.upload_id,
				size_hint = hint,
				actual = session.buffered_bytes,
				"Upload size differs from the declared total."
			);
		}

		let mut bytes = Vec::with_capacity(session.buffered_bytes as usize);

		for buffer in session.buffers.values() {
			bytes.extend_from_slice(buffer);
		}

		Ok(Accepted::Finalize { bytes, total: session.total_chunks })
	}

	fn validate(&self, chunk: &ChunkUpload<'_>) -> Result<()> {
		if chunk.upload_id.trim().is_empty() {
			return Err(Error::InvalidRequest { message: "Upload id must not be empty.".to_string() });
		}
		if chunk.total_chunks == 0 {
			return Err(Error::InvalidRequest {
				message: "Total chunks must be at least one.".to_string(),
			});
		}
		if chunk.total_chunks > self.cfg.max_chunks {
			return Err(Error::InvalidRequest {
				message: format!("Total chunks must not exceed {}.", self.cfg.max_chunks),
			});
		}
		if chunk.chunk_index >= chunk.total_chunks {
			return Err(Error::InvalidRequest {
				message: format!(
					"Chunk index {} is out of range for {} chunks.",
					chunk.chunk_index, chunk.total_chunks
				),
			});
		}
		if chunk.bytes.len() > self.cfg.max_chunk_bytes {
			return Err(Error::InvalidRequest {
				message: format!("Chunk exceeds the {} byte limit.", self.cfg.max_chunk_bytes),
			});
		}
		if let Some(hint) = chunk.total_size_hint
			&& hint > self.cfg.max_upload_bytes
		{
			return Err(Error::InvalidRequest {
				message: format!("Upload exceeds the {} byte limit.", self.cfg.max_upload_bytes),
			});
		}

		Ok(())
	}

	fn finish(&self, key: &SessionKey, receipt: &ChunkReceipt, now: Instant) {
		let mut sessions = self.lock();

		sessions.open.remove(key);
		sessions.completed.insert(key.clone(), Completed { receipt: receipt.clone(), completed_at: now });
	}

	fn abort(&self, key: &SessionKey) {
		if let Some(session) = self.lock().open.get_mut(key) {
			session.finalizing = false;
		}
	}
}

impl PersonaService {
	/// Buffers one upload chunk and, once every chunk is present, writes the assembled export to
	/// object storage.
	pub async fn receive_chunk(&self, chunk: ChunkUpload<'_>) -> Result<ChunkReceipt> {
		self.receive_chunk_at(chunk, Instant::now()).await
	}

	pub(crate) async fn receive_chunk_at(
		&self,
		chunk: ChunkUpload<'_>,
		now: Instant,
	) -> Result<ChunkReceipt> {
		let key = (chunk.user_id.to_string(), chunk.upload_id.to_string());
		let (bytes, total) = match self.uploads.accept(&key, &chunk, now)? {
			Accepted::Receipt(receipt) => return Ok(receipt),
			Accepted::Finalize { bytes, total } => (bytes, total),
		};
		let unix_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
		let path = format!("{}/{unix_ms}-{UPLOAD_FILE_NAME}", chunk.user_id);

		if let Err(err) = self.objects.put(&path, &bytes).await {
			self.uploads.abort(&key);

			tracing::error!(
				error = %err,
				user_id = chunk.user_id,
				upload_id = chunk.upload_id,
				"Assembled upload write failed."
			);

			return Err(Error::Storage { message: format!("Failed to store upload: {err}") });
		}

		let receipt = ChunkReceipt {
			complete: true,
			received: total,
			total,
			path: Some(path),
			size: Some(bytes.len() as u64),
			digest: Some(blake3::hash(&bytes).to_hex().to_string()),
		};

		self.uploads.finish(&key, &receipt, now);

		tracing::info!(
			user_id = chunk.user_id,
			upload_id = chunk.upload_id,
			size = bytes.len(),
			chunks = total,
			"Upload assembled."
		);

		Ok(receipt)
	}
}

/// Evicts idle upload sessions on a timer, so abandoned uploads release their buffers even when
/// no further chunk arrives.
pub fn spawn_upload_sweeper(service: Arc<PersonaService>) -> JoinHandle<()> {
	let period = Duration::from_secs((service.cfg.upload.session_ttl_seconds / 4).max(1));

	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(period);

		loop {
			ticker.tick().await;

			let evicted = service.uploads.evict_expired(Instant::now());

			if evicted > 0 {
				tracing::info!(evicted, "Evicted idle upload sessions.");
			}
		}
	})
}
