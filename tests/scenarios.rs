//! End-to-end scenarios driving the whole engine against in-memory peers.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{pump_until, FakePeer, FakePeerManager};
use lanshare::cache::Cache;
use lanshare::entry::{Entry, EntryType};
use lanshare::file_cache;
use lanshare::hash::Hash;
use lanshare::manager::DownloadManager;
use lanshare::peer::{Peer, PeerManager};
use lanshare::queue::{self, QueueEntryRecord};
use lanshare::settings::Settings;
use lanshare::Status;

fn settings(chunk_size: u32, number_of_downloader: usize) -> Settings {
    Settings {
        chunk_size,
        number_of_downloader,
        rescan_period: Duration::from_millis(50),
        ..Settings::default()
    }
}

struct Fixture {
    peers: Arc<FakePeerManager>,
    manager: DownloadManager,
    share: tempfile::TempDir,
    _data: tempfile::TempDir,
}

fn fixture(settings: Settings) -> Fixture {
    let share = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let cache = Cache::new(settings.clone());
    cache.add_shared_directory(share.path(), false).unwrap();
    let peers = FakePeerManager::new();
    let peer_manager: Arc<dyn PeerManager> = Arc::clone(&peers) as Arc<dyn PeerManager>;
    let manager = DownloadManager::new(settings, cache, peer_manager, data.path());
    Fixture {
        peers,
        manager,
        share,
        _data: data,
    }
}

#[test]
fn simple_file_completes() {
    let mut fx = fixture(settings(8, 3));
    let content = b"0123456789012345678901234567890123456789";
    let entry = Entry::file("/", "f.bin", content.len() as u64);

    let peer = FakePeer::new("peer", 8);
    peer.serve_file(&entry, content);
    peer.set_delay(Duration::from_millis(30));
    fx.peers.add(Arc::clone(&peer));

    fx.manager.add_download(entry, peer.id());

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut saw_rate = false;
    loop {
        fx.manager.pump(Duration::from_millis(20));
        if fx.manager.get_download_rate() > 0 {
            saw_rate = true;
        }
        let status = fx.manager.get_downloads()[0].status;
        if status == Status::Complete || Instant::now() >= deadline {
            break;
        }
    }

    let snapshots = fx.manager.get_downloads();
    let snapshot = &snapshots[0];
    assert_eq!(snapshot.status, Status::Complete);
    assert_eq!(snapshot.downloaded_bytes, content.len() as u64);
    assert!(saw_rate, "the transfer rate was never observed above zero");
    assert_eq!(
        fx.manager.get_global_progress(),
        (content.len() as u64, content.len() as u64)
    );
    assert_eq!(
        fs::read(fx.share.path().join("f.bin")).unwrap(),
        content.to_vec()
    );

    // The entry stays queued until explicitly removed
    assert_eq!(fx.manager.get_downloads().len(), 1);
    fx.manager.remove_completed();
    assert!(fx.manager.get_downloads().is_empty());
}

#[test]
fn restart_resumes_mid_transfer() {
    let share = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let config = settings(4, 3);
    let content = b"0123456789";
    let entry = Entry::file("/", "f.bin", 10);
    let hashes: Vec<Hash> = content.chunks(4).map(Hash::of).collect();

    // First run: chunk 0 done, chunk 1 interrupted two bytes in
    {
        let cache = Cache::new(config.clone());
        cache.add_shared_directory(share.path(), false).unwrap();
        let file = cache.create_file_for_download(&entry).unwrap();
        file.set_hashes(&hashes);

        let mut writer = file.open_chunk_writer(0, cache.settings()).unwrap();
        writer.write(&content[0..4]).unwrap();
        assert!(writer.finish().unwrap());

        let mut writer = file.open_chunk_writer(1, cache.settings()).unwrap();
        writer.write(&content[4..6]).unwrap();
        drop(writer);

        file_cache::save(&cache, data.path()).unwrap();
        queue::save(
            vec![QueueEntryRecord {
                entry: entry.clone(),
                peer_id: Hash::of(b"peer"),
                complete: false,
            }],
            data.path(),
        )
        .unwrap();
    }

    // Second run: restore, then finish from the network
    let cache = Cache::new(config.clone());
    cache.add_shared_directory(share.path(), false).unwrap();
    file_cache::load(&cache, data.path()).unwrap();

    let restored = cache.shared_directories()[0]
        .root()
        .get_file("f.bin.unfinished")
        .unwrap();
    let chunks = restored.chunks();
    assert!(chunks[0].complete);
    assert_eq!(chunks[1].known_bytes, 2);
    assert_eq!(
        chunks.iter().filter(|c| c.hash.is_some()).count(),
        3,
        "the hash index must carry every chunk hash"
    );

    let peer = FakePeer::new("peer", 4);
    peer.serve_file(&entry, content);
    let peers = FakePeerManager::new();
    peers.add(Arc::clone(&peer));

    let peer_manager: Arc<dyn PeerManager> = Arc::clone(&peers) as Arc<dyn PeerManager>;
    let mut manager = DownloadManager::new(config, Arc::clone(&cache), peer_manager, data.path());
    manager.load_queue().unwrap();

    assert!(pump_until(&mut manager, Duration::from_secs(10), |m| {
        m.get_downloads()[0].status == Status::Complete
    }));
    assert_eq!(fs::read(share.path().join("f.bin")).unwrap(), content);

    // Chunk 0 was never asked again; chunk 1 resumed at offset 2
    let requests = peer.chunk_requests();
    assert_eq!(requests, vec![(hashes[1], 2), (hashes[2], 0)]);
}

#[test]
fn directory_expansion_preserves_queue_order() {
    let mut fx = fixture(settings(4, 3));

    let a = Entry::file("/", "A", 4);
    let b = Entry::file("/", "B", 4);
    let dir = Entry::dir("/", "D");
    let d1 = Entry::file("/D/", "d1", 4);
    let d2 = Entry::file("/D/", "d2", 4);

    let peer = FakePeer::new("peer", 4);
    for (entry, content) in [(&a, b"aaaa"), (&b, b"bbbb"), (&d1, b"1111"), (&d2, b"2222")] {
        peer.serve_file(entry, content);
    }
    peer.serve_listing(&dir, vec![d1.clone(), d2.clone()]);
    fx.peers.add(Arc::clone(&peer));

    fx.manager.add_download(a, peer.id());
    fx.manager.add_download(dir, peer.id());
    fx.manager.add_download(b.clone(), peer.id());

    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        !m.get_downloads()
            .iter()
            .any(|s| s.entry.kind == EntryType::Dir)
    }));

    let names: Vec<String> = fx
        .manager
        .get_downloads()
        .iter()
        .map(|s| s.entry.name.clone())
        .collect();
    assert_eq!(names, vec!["A", "d1", "d2", "B"]);

    // Re-adding an already queued entry is a no-op
    fx.manager.add_download(b, peer.id());
    assert_eq!(fx.manager.get_downloads().len(), 4);
}

#[test]
fn corrupt_peer_is_banned_and_another_takes_over() {
    let mut fx = fixture(settings(4, 3));
    let entry = Entry::file("/", "f.bin", 4);

    let bad = FakePeer::new("bad peer", 4);
    bad.serve_file(&entry, b"good");
    bad.set_corrupt(true);
    let good = FakePeer::new("good peer", 4);
    good.serve_file(&entry, b"good");
    fx.peers.add(Arc::clone(&bad));
    fx.peers.add(Arc::clone(&good));

    // The corrupt peer is the preferred source
    fx.manager.add_download(entry, bad.id());

    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.get_downloads()[0].status == Status::Complete
    }));

    assert!(!bad.chunk_requests().is_empty());
    assert!(!good.chunk_requests().is_empty());
    assert_eq!(fs::read(fx.share.path().join("f.bin")).unwrap(), b"good");
}

#[test]
fn no_source_recovers_when_the_peer_comes_back() {
    let mut fx = fixture(settings(4, 3));
    let entry = Entry::file("/", "f.bin", 4);

    let peer = FakePeer::new("peer", 4);
    peer.serve_file(&entry, b"data");
    peer.set_connected(false);
    fx.peers.add(Arc::clone(&peer));

    fx.manager.add_download(entry, peer.id());
    assert_eq!(fx.manager.get_downloads()[0].status, Status::NoSource);

    peer.set_connected(true);

    // The rescan timer notices the peer on its own
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.get_downloads()[0].status == Status::Complete
    }));
    assert_eq!(fs::read(fx.share.path().join("f.bin")).unwrap(), b"data");
}

#[test]
fn concurrent_transfers_respect_the_cap() {
    let mut fx = fixture(settings(16, 2));

    let mut sources = Vec::new();
    for index in 0..4 {
        let entry = Entry::file("/", &format!("f{}.bin", index), 16);
        let peer = FakePeer::new(&format!("peer {}", index), 16);
        peer.serve_file(&entry, &[index as u8; 16]);
        peer.set_delay(Duration::from_millis(60));
        fx.peers.add(Arc::clone(&peer));
        sources.push((entry, peer));
    }
    for (entry, peer) in &sources {
        fx.manager.add_download(entry.clone(), peer.id());
    }

    let deadline = Instant::now() + Duration::from_secs(15);
    let mut max_in_flight = 0;
    loop {
        assert!(fx.manager.in_flight_chunks() <= 2);
        max_in_flight = max_in_flight.max(fx.manager.in_flight_chunks());
        let all_complete = fx
            .manager
            .get_downloads()
            .iter()
            .all(|s| s.status == Status::Complete);
        if all_complete || Instant::now() >= deadline {
            break;
        }
        fx.manager.pump(Duration::from_millis(10));
    }

    assert_eq!(max_in_flight, 2);
    for (entry, _) in &sources {
        assert_eq!(
            fx.manager
                .get_downloads()
                .iter()
                .find(|s| s.entry.name == entry.name)
                .unwrap()
                .status,
            Status::Complete
        );
    }
}

#[test]
fn restart_after_write_error_retries_from_scratch() {
    let data = tempfile::tempdir().unwrap();
    let config = settings(4, 3);
    let entry = Entry::file("/", "f.bin", 4);

    let peer = FakePeer::new("peer", 4);
    peer.serve_file(&entry, b"data");

    // First run: the only share is read-only
    {
        let read_only_share = tempfile::tempdir().unwrap();
        let cache = Cache::new(config.clone());
        cache
            .add_shared_directory(read_only_share.path(), true)
            .unwrap();
        let peers = FakePeerManager::new();
        peers.add(Arc::clone(&peer));
        let peer_manager: Arc<dyn PeerManager> = Arc::clone(&peers) as Arc<dyn PeerManager>;
        let mut manager = DownloadManager::new(config.clone(), cache, peer_manager, data.path());

        manager.add_download(entry.clone(), peer.id());
        assert!(pump_until(&mut manager, Duration::from_secs(10), |m| {
            m.get_downloads()[0].status == Status::NoSharedDirectoryToWrite
        }));
        manager.save_queue().unwrap();
    }

    // The error status is not persisted as completion
    let records = queue::load(data.path()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].complete);
    queue::save(records, data.path()).unwrap();

    // Second run: a writable share appeared
    let share = tempfile::tempdir().unwrap();
    let cache = Cache::new(config.clone());
    cache.add_shared_directory(share.path(), false).unwrap();
    let peers = FakePeerManager::new();
    peers.add(Arc::clone(&peer));
    let peer_manager: Arc<dyn PeerManager> = Arc::clone(&peers) as Arc<dyn PeerManager>;
    let mut manager = DownloadManager::new(config, cache, peer_manager, data.path());
    manager.load_queue().unwrap();

    let status = manager.get_downloads()[0].status;
    assert!(!status.is_error(), "restored download restarts cleanly");

    assert!(pump_until(&mut manager, Duration::from_secs(10), |m| {
        m.get_downloads()[0].status == Status::Complete
    }));
    assert_eq!(fs::read(share.path().join("f.bin")).unwrap(), b"data");
}

#[test]
fn empty_directory_expands_to_nothing() {
    let mut fx = fixture(settings(4, 3));
    let dir = Entry::dir("/", "empty");

    let peer = FakePeer::new("peer", 4);
    peer.serve_listing(&dir, Vec::new());
    fx.peers.add(Arc::clone(&peer));

    fx.manager.add_download(dir, peer.id());
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.get_downloads().is_empty()
    }));
}

#[test]
fn pause_holds_progress_and_resume_finishes() {
    let mut fx = fixture(settings(4, 1));
    let content = b"0123456789ab";
    let entry = Entry::file("/", "f.bin", 12);

    let peer = FakePeer::new("peer", 4);
    peer.serve_file(&entry, content);
    peer.set_delay(Duration::from_millis(50));
    fx.peers.add(Arc::clone(&peer));

    fx.manager.add_download(entry, peer.id());
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.in_flight_chunks() > 0
    }));

    let id = fx.manager.get_downloads()[0].id;
    fx.manager.pause_downloads(&[id], true);
    assert_eq!(fx.manager.get_downloads()[0].status, Status::Paused);

    // In-flight transfers drain and nothing new starts
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.in_flight_chunks() == 0
    }));
    fx.manager.pump(Duration::from_millis(100));
    assert_eq!(fx.manager.in_flight_chunks(), 0);
    assert_eq!(fx.manager.get_downloads()[0].status, Status::Paused);

    // Received hashes survive the pause
    let unfinished = fx.manager.get_unfinished_chunks(10);
    assert!(!unfinished.is_empty());
    assert!(unfinished.iter().all(|c| c.hash.is_some()));

    fx.manager.pause_downloads(&[id], false);
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.get_downloads()[0].status == Status::Complete
    }));
    assert_eq!(fs::read(fx.share.path().join("f.bin")).unwrap(), content);
}

#[test]
fn download_rate_is_zero_when_idle() {
    let fx = fixture(settings(4, 3));
    assert_eq!(fx.manager.get_download_rate(), 0);
}

#[test]
fn cancelling_forgets_the_download() {
    let mut fx = fixture(settings(4, 1));
    let entry = Entry::file("/", "f.bin", 8);

    let peer = FakePeer::new("peer", 4);
    peer.serve_file(&entry, b"01234567");
    peer.set_delay(Duration::from_millis(50));
    fx.peers.add(Arc::clone(&peer));

    fx.manager.add_download(entry.clone(), peer.id());
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.in_flight_chunks() > 0
    }));

    let id = fx.manager.get_downloads()[0].id;
    fx.manager.cancel_downloads(&[id], false);
    assert!(fx.manager.get_downloads().is_empty());

    // The in-flight worker unwinds without disturbing anything
    assert!(pump_until(&mut fx.manager, Duration::from_secs(10), |m| {
        m.in_flight_chunks() == 0
    }));

    // Re-adding is not a duplicate once the entry is gone
    fx.manager.add_download(entry, peer.id());
    assert_eq!(fx.manager.get_downloads().len(), 1);
}
