use std::sync::Arc;

use tokio::task::JoinSet;

use persona_service::{ChunkReceipt, ChunkUpload, Error};
use persona_storage::ObjectStore;

use super::support::{DispatchMode, StubLlm, harness};

fn piece<'a>(user_id: &'a str, upload_id: &'a str, index: usize, parts: &[&[u8]]) -> ChunkUpload<'a> {
	ChunkUpload {
		user_id,
		upload_id,
		chunk_index: index as u32,
		total_chunks: parts.len() as u32,
		total_size_hint: Some(parts.iter().map(|p| p.len() as u64).sum()),
		bytes: parts[index].to_vec(),
	}
}

#[tokio::test]
async fn reassembles_in_index_order_regardless_of_arrival() {
	let payload = b"[{\"id\":\"conversation export payload\"}]".to_vec();

	for total in [1_usize, 2, 5] {
		let h = harness(StubLlm::replying("{}"), DispatchMode::Record);
		let size = payload.len().div_ceil(total);
		let parts = payload.chunks(size).collect::<Vec<_>>();

		assert_eq!(parts.len(), total);

		// Reverse order, with every piece but the first sent twice.
		let mut order = (0..total).rev().collect::<Vec<_>>();

		order.extend((1..total).rev());

		let mut last = None;

		for index in order {
			last = Some(h.service.receive_chunk(piece("u1", "up", index, &parts)).await);
		}

		// The final delivery of the re-sent pieces lands after completion.
		let receipt = last.expect("No chunks sent.").expect("Chunk failed.");

		assert!(receipt.complete, "total={total}");

		let path = receipt.path.clone().expect("Missing path.");

		assert!(path.starts_with("u1/") && path.ends_with("-conversations.json"));
		assert_eq!(receipt.size, Some(payload.len() as u64));
		assert_eq!(receipt.digest, Some(blake3::hash(&payload).to_hex().to_string()));
		assert_eq!(h.objects.get(&path).await.expect("Missing object."), payload);
		assert_eq!(h.objects.put_count(), 1);
		assert_eq!(h.service.uploads.open_sessions(), 0);
	}
}

#[tokio::test]
async fn reports_partial_progress_until_complete() {
	let h = harness(StubLlm::replying("{}"), DispatchMode::Record);
	let parts: [&[u8]; 3] = [b"a", b"b", b"c"];
	let first = h.service.receive_chunk(piece("u1", "up", 2, &parts)).await.expect("Chunk failed.");
	let again = h.service.receive_chunk(piece("u1", "up", 2, &parts)).await.expect("Chunk failed.");

	assert_eq!(first, ChunkReceipt {
		complete: false,
		received: 1,
		total: 3,
		path: None,
		size: None,
		digest: None
	});
	assert_eq!(again.received, 1);
	assert_eq!(h.objects.put_count(), 0);
}

#[tokio::test]
async fn retransmission_after_completion_returns_same_receipt() {
	let h = harness(StubLlm::replying("{}"), DispatchMode::Record);
	let parts: [&[u8]; 2] = [b"ab", b"cd"];

	h.service.receive_chunk(piece("u1", "up", 0, &parts)).await.expect("Chunk failed.");

	let done = h.service.receive_chunk(piece("u1", "up", 1, &parts)).await.expect("Chunk failed.");
	let resent = h.service.receive_chunk(piece("u1", "up", 1, &parts)).await.expect("Chunk failed.");

	assert!(done.complete);
	assert_eq!(done, resent);
	assert_eq!(h.objects.put_count(), 1);
}

#[tokio::test]
async fn storage_failure_keeps_buffered_pieces() {
	let h = harness(StubLlm::replying("{}"), DispatchMode::Record);
	let parts: [&[u8]; 2] = [b"ab", b"cd"];

	h.service.receive_chunk(piece("u1", "up", 0, &parts)).await.expect("Chunk failed.");
	h.objects.fail_next_puts(1);

	let err = h
		.service
		.receive_chunk(piece("u1", "up", 1, &parts))
		.await
		.expect_err("Expected storage failure.");

	assert!(matches!(err, Error::Storage { .. }));
	assert_eq!(h.service.uploads.open_sessions(), 1);

	let receipt =
		h.service.receive_chunk(piece("u1", "up", 1, &parts)).await.expect("Retry failed.");
	let path = receipt.path.expect("Missing path.");

	assert_eq!(h.objects.get(&path).await.expect("Missing object."), b"abcd");
}

#[tokio::test]
async fn sessions_are_scoped_per_user() {
	let h = harness(StubLlm::replying("{}"), DispatchMode::Record);
	let parts: [&[u8]; 2] = [b"ab", b"cd"];

	h.service.receive_chunk(piece("u1", "same", 0, &parts)).await.expect("Chunk failed.");

	let other = h.service.receive_chunk(piece("u2", "same", 1, &parts)).await.expect("Chunk failed.");

	assert!(!other.complete);
	assert_eq!(h.service.uploads.open_sessions(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_chunks_complete_exactly_once() {
	const PIECES: usize = 16;

	for round in 0..20 {
		let h = Arc::new(harness(StubLlm::replying("{}"), DispatchMode::Record));
		let payload = (0..PIECES * 8).map(|i| (i % 251) as u8).collect::<Vec<_>>();
		let parts = Arc::new(payload.chunks(8).map(<[u8]>::to_vec).collect::<Vec<_>>());
		let mut sends = JoinSet::new();

		for index in 0..PIECES {
			let h = h.clone();
			let parts = parts.clone();

			sends.spawn(async move {
				h.service
					.receive_chunk(ChunkUpload {
						user_id: "u1",
						upload_id: "up",
						chunk_index: index as u32,
						total_chunks: PIECES as u32,
						total_size_hint: None,
						bytes: parts[index].clone(),
					})
					.await
			});
		}

		let mut complete = Vec::new();

		while let Some(joined) = sends.join_next().await {
			let receipt = joined.expect("Send task panicked.").expect("Chunk failed.");

			if receipt.complete {
				complete.push(receipt);
			}
		}

		assert_eq!(complete.len(), 1, "round={round}");
		assert_eq!(h.objects.put_count(), 1, "round={round}");

		let path = complete[0].path.clone().expect("Missing path.");

		assert_eq!(h.objects.get(&path).await.expect("Missing object."), payload);
		assert_eq!(h.service.uploads.open_sessions(), 0);
	}
}
