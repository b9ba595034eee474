use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use wapb_lib::negotiate::{encode_record, ResponseFormat};
use wapb_lib::store::{make_key, Envelope, Header};
use wapb_lib::{
    Codec, CreateRequest, Error, File, FileGroup, IdGenerator, Kind, Link, ManualClock, MemoryStore,
    Meta, Params, RecordStore, Service, SledStore, Storage, Text, UploadPart,
};

const T0: i64 = 1_700_000_000;

fn service_on(backend: Arc<dyn RecordStore>) -> (Service, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let storage = Storage::new(backend, Codec::default(), clock.clone());
    (Service::new(storage, Arc::new(IdGenerator::from_seed(7))), clock)
}

fn service() -> (Service, Arc<ManualClock>) {
    service_on(Arc::new(MemoryStore::new()))
}

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn create_text(svc: &Service, body: &str, pairs: &[(&str, &str)]) -> Text {
    let p = params(pairs);
    let req = CreateRequest {
        content_type: Some("text/plain"),
        params: &p,
        body: body.as_bytes(),
    };
    svc.create::<Text>(&req).await.unwrap().record
}

async fn create_group(svc: &Service, pairs: &[(&str, &str)]) -> FileGroup {
    let p = params(pairs);
    let req = CreateRequest {
        content_type: None,
        params: &p,
        body: b"",
    };
    svc.create::<FileGroup>(&req).await.unwrap().record
}

fn part(filename: &str, contents: &[u8]) -> UploadPart {
    UploadPart {
        name: "file".into(),
        filename: filename.into(),
        content_type: None,
        contents: contents.to_vec(),
    }
}

fn listed_ids(listing: &[u8]) -> Vec<String> {
    let v: serde_json::Value = serde_json::from_slice(listing).unwrap();
    v["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_text_round_trip() {
    let (svc, _) = service();
    let created = create_text(&svc, "hello world", &[]).await;
    assert_eq!(created.common.id.len(), 10);
    assert_eq!(created.common.created, T0);

    let fetched: Text = svc.get(&created.common.id).await.unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.text, "hello world");
}

#[tokio::test]
async fn test_link_round_trip_from_json() {
    let (svc, _) = service();
    let p = Params::new();
    let req = CreateRequest {
        content_type: Some("application/json"),
        params: &p,
        body: br#"{"url":"https://example.com/a?b=c"}"#,
    };
    let created = svc.create::<Link>(&req).await.unwrap();
    let fetched: Link = svc.get(&created.record.common.id).await.unwrap();
    assert_eq!(fetched.url, "https://example.com/a?b=c");
}

#[tokio::test]
async fn test_link_keeps_surrounding_whitespace() {
    let (svc, _) = service();
    let p = Params::new();
    let bodies: [(&str, &[u8]); 2] = [
        ("application/json", br#"{"url":"  https://a.example/ "}"#),
        ("application/x-www-form-urlencoded", b"url=++https%3A%2F%2Fa.example%2F+"),
    ];
    for (content_type, body) in bodies {
        let req = CreateRequest {
            content_type: Some(content_type),
            params: &p,
            body,
        };
        let created = svc.create::<Link>(&req).await.unwrap();
        let fetched: Link = svc.get(&created.record.common.id).await.unwrap();
        assert_eq!(fetched.url, "  https://a.example/ ", "{}", content_type);
    }
}

#[tokio::test]
async fn test_burn_once() {
    let (svc, _) = service();
    let t = create_text(&svc, "secret", &[("burn", "true")]).await;

    let first: Text = svc.get(&t.common.id).await.unwrap();
    assert_eq!(first.text, "secret");

    let second = svc.get::<Text>(&t.common.id).await;
    assert!(matches!(second, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_negotiation_echo() {
    let (svc, _) = service();
    let t = create_text(&svc, "hello", &[("burn", "false")]).await;
    let fetched: Text = svc.get(&t.common.id).await.unwrap();
    let out = encode_record(&fetched, ResponseFormat::RawText, svc.codec()).unwrap();
    assert_eq!(out.body, b"hello");
}

#[tokio::test]
async fn test_hidden_not_listed_but_fetchable() {
    let (svc, _) = service();
    let shown = create_text(&svc, "public", &[]).await;
    let hidden = create_text(&svc, "private", &[("hidden", "1")]).await;

    let ids = listed_ids(&svc.list(Kind::Text).await.unwrap());
    assert_eq!(ids, vec![shown.common.id.clone()]);

    let fetched: Text = svc.get(&hidden.common.id).await.unwrap();
    assert_eq!(fetched.text, "private");

    // administrative enumeration sees both
    let info = svc.info(Kind::Text).await.unwrap();
    assert_eq!(info.len(), 2);
    assert!(info.iter().any(|i| i.id == hidden.common.id && i.meta.hidden));
}

#[tokio::test]
async fn test_listing_redacts_burn_records() {
    let (svc, _) = service();
    let t = create_text(&svc, "secret", &[("burn", "yes")]).await;

    let listing = svc.list(Kind::Text).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&listing).unwrap();
    assert_eq!(v["data"][0]["id"], t.common.id.as_str());
    assert_eq!(v["data"][0]["burn"], true);
    assert_eq!(v["data"][0]["text"], "");

    // listing is not a read
    let fetched: Text = svc.get(&t.common.id).await.unwrap();
    assert_eq!(fetched.text, "secret");
}

#[tokio::test]
async fn test_ttl_expiry() {
    let (svc, clock) = service();
    let t = create_text(&svc, "short lived", &[("ttl", "30")]).await;

    clock.advance(29);
    assert!(svc.get::<Text>(&t.common.id).await.is_ok());
    assert_eq!(listed_ids(&svc.list(Kind::Text).await.unwrap()).len(), 1);

    clock.advance(1);
    assert!(matches!(svc.get::<Text>(&t.common.id).await, Err(Error::NotFound)));
    assert!(listed_ids(&svc.list(Kind::Text).await.unwrap()).is_empty());
    assert!(matches!(
        svc.delete::<Text>(&t.common.id).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn test_purge_expired() {
    let (svc, clock) = service();
    create_text(&svc, "a", &[("ttl", "10")]).await;
    create_text(&svc, "b", &[("ttl", "100")]).await;
    let keep = create_text(&svc, "c", &[]).await;

    clock.advance(50);
    assert_eq!(svc.storage().purge_expired().await.unwrap(), 1);

    let info = svc.info(Kind::Text).await.unwrap();
    assert_eq!(info.len(), 2);
    assert!(info.iter().any(|i| i.id == keep.common.id && i.expires_at.is_none()));
}

#[tokio::test]
async fn test_delete() {
    let (svc, _) = service();
    let t = create_text(&svc, "bye", &[]).await;
    svc.delete::<Text>(&t.common.id).await.unwrap();
    assert!(matches!(svc.get::<Text>(&t.common.id).await, Err(Error::NotFound)));
    assert!(matches!(
        svc.delete::<Text>(&t.common.id).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn test_id_uniqueness() {
    let (svc, _) = service();
    let mut seen = HashSet::new();
    for i in 0..500 {
        let t = create_text(&svc, &format!("note {}", i), &[]).await;
        assert!(seen.insert(t.common.id));
    }
    assert_eq!(svc.info(Kind::Text).await.unwrap().len(), 500);
}

#[tokio::test]
async fn test_id_collision_retries() {
    let backend: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    // same seed, so the second service draws the first one's id first
    let (first_svc, _) = service_on(backend.clone());
    let (second_svc, _) = service_on(backend);

    let first = create_text(&first_svc, "first", &[]).await;
    let second = create_text(&second_svc, "second", &[]).await;
    assert_ne!(first.common.id, second.common.id);

    let kept: Text = first_svc.get(&first.common.id).await.unwrap();
    assert_eq!(kept.text, "first");
    let other: Text = first_svc.get(&second.common.id).await.unwrap();
    assert_eq!(other.text, "second");
}

/// Backend on which every id of one kind is already taken.
struct TakenStore {
    inner: MemoryStore,
    tag: u8,
}

#[async_trait]
impl RecordStore for TakenStore {
    async fn get(&self, key: &[u8]) -> wapb_lib::Result<Option<Envelope>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &[u8], record: &Envelope) -> wapb_lib::Result<()> {
        self.inner.put(key, record).await
    }

    async fn put_if_absent(&self, key: &[u8], record: &Envelope, now: i64) -> wapb_lib::Result<bool> {
        if key.first() == Some(&self.tag) {
            return Ok(false);
        }
        self.inner.put_if_absent(key, record, now).await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        current: &Envelope,
        new: &Envelope,
    ) -> wapb_lib::Result<bool> {
        self.inner.compare_and_swap(key, current, new).await
    }

    async fn remove(&self, key: &[u8]) -> wapb_lib::Result<Option<Envelope>> {
        self.inner.remove(key).await
    }

    async fn scan(&self, prefix: &[u8]) -> wapb_lib::Result<Vec<(Vec<u8>, Envelope)>> {
        self.inner.scan(prefix).await
    }

    async fn scan_headers(&self, prefix: &[u8]) -> wapb_lib::Result<Vec<(Vec<u8>, Header)>> {
        self.inner.scan_headers(prefix).await
    }

    async fn purge_expired(&self, now: i64) -> wapb_lib::Result<usize> {
        self.inner.purge_expired(now).await
    }

    async fn flush(&self) -> wapb_lib::Result<()> {
        self.inner.flush().await
    }
}

fn taken(kind: Kind) -> Arc<dyn RecordStore> {
    Arc::new(TakenStore {
        inner: MemoryStore::new(),
        tag: kind.tag(),
    })
}

#[tokio::test]
async fn test_id_space_exhausted_on_create() {
    let (svc, _) = service_on(taken(Kind::Text));
    let p = Params::new();
    let req = CreateRequest {
        content_type: Some("text/plain"),
        params: &p,
        body: b"nowhere to go",
    };
    match svc.create::<Text>(&req).await {
        Err(Error::Storage(msg)) => assert_eq!(msg, "identifier space exhausted"),
        other => panic!("expected exhaustion, got {:?}", other.map(|c| c.record)),
    }
    assert!(svc.info(Kind::Text).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_id_space_exhausted_on_upload() {
    let (svc, _) = service_on(taken(Kind::File));
    let group = create_group(&svc, &[]).await;

    let mut batch = svc.begin_upload(&group.common.id).await.unwrap();
    match batch.add(part("a.txt", b"a")).await {
        Err(Error::Storage(msg)) => assert_eq!(msg, "identifier space exhausted"),
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert!(batch.files().is_empty());
    batch.abort().await;
}

async fn assert_expired_key_is_free(store: &dyn RecordStore) {
    let key = make_key(Kind::Text, "abc");
    let old = Envelope::new(Meta::EMPTY, Some(T0), b"{\"text\":\"old\"}".to_vec());
    let new = Envelope::new(Meta::EMPTY, None, b"{\"text\":\"new\"}".to_vec());
    store.put(&key, &old).await.unwrap();

    // still live one second before expiry
    assert!(!store.put_if_absent(&key, &new, T0 - 1).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(old));

    assert!(store.put_if_absent(&key, &new, T0).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(new));
}

#[tokio::test]
async fn test_expired_record_is_not_a_collision() {
    assert_expired_key_is_free(&MemoryStore::new()).await;
    assert_expired_key_is_free(&SledStore::temporary().unwrap()).await;
}

async fn assert_compare_and_swap(store: &dyn RecordStore) {
    let key = make_key(Kind::FileGroup, "g1");
    let a = Envelope::new(Meta::EMPTY, None, b"{}".to_vec());
    let b = Envelope::new(Meta::EMPTY, Some(T0), b"{\"id\":\"g1\"}".to_vec());
    store.put(&key, &a).await.unwrap();

    assert!(store.compare_and_swap(&key, &a, &b).await.unwrap());
    // `a` is stale now
    assert!(!store.compare_and_swap(&key, &a, &a).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), Some(b));

    let missing = make_key(Kind::FileGroup, "g2");
    assert!(!store.compare_and_swap(&missing, &a, &a).await.unwrap());
    assert_eq!(store.get(&missing).await.unwrap(), None);
}

#[tokio::test]
async fn test_compare_and_swap() {
    assert_compare_and_swap(&MemoryStore::new()).await;
    assert_compare_and_swap(&SledStore::temporary().unwrap()).await;
}

/// Backend where another upload commits to the group right before our first
/// compare-and-swap lands.
struct RacingStore {
    inner: MemoryStore,
    raced: AtomicBool,
}

#[async_trait]
impl RecordStore for RacingStore {
    async fn get(&self, key: &[u8]) -> wapb_lib::Result<Option<Envelope>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &[u8], record: &Envelope) -> wapb_lib::Result<()> {
        self.inner.put(key, record).await
    }

    async fn put_if_absent(&self, key: &[u8], record: &Envelope, now: i64) -> wapb_lib::Result<bool> {
        self.inner.put_if_absent(key, record, now).await
    }

    async fn compare_and_swap(
        &self,
        key: &[u8],
        current: &Envelope,
        new: &Envelope,
    ) -> wapb_lib::Result<bool> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let mut group: FileGroup = serde_json::from_slice(&current.payload).unwrap();
            group.files.push(File {
                id: "elsewhere".into(),
                name: "file".into(),
                filename: "other.txt".into(),
                mime: "text/plain".into(),
            });
            let payload = serde_json::to_vec(&group).unwrap();
            let header = current.header;
            let other = Envelope::new(header.meta, header.expires_at, payload);
            self.inner.put(key, &other).await?;
        }
        self.inner.compare_and_swap(key, current, new).await
    }

    async fn remove(&self, key: &[u8]) -> wapb_lib::Result<Option<Envelope>> {
        self.inner.remove(key).await
    }

    async fn scan(&self, prefix: &[u8]) -> wapb_lib::Result<Vec<(Vec<u8>, Envelope)>> {
        self.inner.scan(prefix).await
    }

    async fn scan_headers(&self, prefix: &[u8]) -> wapb_lib::Result<Vec<(Vec<u8>, Header)>> {
        self.inner.scan_headers(prefix).await
    }

    async fn purge_expired(&self, now: i64) -> wapb_lib::Result<usize> {
        self.inner.purge_expired(now).await
    }

    async fn flush(&self) -> wapb_lib::Result<()> {
        self.inner.flush().await
    }
}

#[tokio::test]
async fn test_concurrent_commit_keeps_both_batches() {
    let (svc, _) = service_on(Arc::new(RacingStore {
        inner: MemoryStore::new(),
        raced: AtomicBool::new(false),
    }));
    let group = create_group(&svc, &[("ttl", "60")]).await;

    let mut batch = svc.begin_upload(&group.common.id).await.unwrap();
    let ours = batch.add(part("ours.txt", b"ours")).await.unwrap().id.clone();
    let committed = batch.commit().await.unwrap();

    let ids: Vec<&str> = committed.files.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["elsewhere", ours.as_str()]);

    let stored = svc.get_group(&group.common.id).await.unwrap();
    assert_eq!(stored.files, committed.files);
    // the rewrite keeps the group's expiry
    let info = svc.storage().get_info(Kind::FileGroup, &group.common.id).await.unwrap();
    assert_eq!(info.expires_at, Some(T0 + 60));
}

#[tokio::test]
async fn test_kinds_do_not_collide() {
    let (svc, _) = service();
    let t = create_text(&svc, "text", &[]).await;
    assert!(matches!(svc.get::<Link>(&t.common.id).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_upload_and_fetch_files() {
    let (svc, _) = service();
    let group = create_group(&svc, &[]).await;
    let gid = group.common.id.as_str();

    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("notes.txt", b"some notes")).await.unwrap();
    batch.add(part("blob", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR")).await.unwrap();
    let updated = batch.commit().await.unwrap();

    assert_eq!(updated.files.len(), 2);
    assert_eq!(updated.files[0].filename, "notes.txt");
    assert_eq!(updated.files[0].mime, "text/plain");
    assert_eq!(updated.files[1].mime, "image/png");

    let file = svc.get_file(Some(gid), &updated.files[0].id).await.unwrap();
    assert_eq!(file.contents, b"some notes");
    assert_eq!(file.mime(), "text/plain");

    let bare = svc.get_file(None, &updated.files[1].id).await.unwrap();
    assert!(bare.descriptor.is_none());

    // a second batch appends
    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("more.txt", b"more")).await.unwrap();
    assert_eq!(batch.commit().await.unwrap().files.len(), 3);
}

#[tokio::test]
async fn test_upload_into_missing_group() {
    let (svc, _) = service();
    assert!(matches!(svc.begin_upload("0000000000").await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_upload_does_not_burn_group() {
    let (svc, _) = service();
    let group = create_group(&svc, &[("burn", "1")]).await;
    let gid = group.common.id.as_str();

    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("a.txt", b"a")).await.unwrap();
    batch.commit().await.unwrap();

    let fetched = svc.get_group(gid).await.unwrap();
    assert_eq!(fetched.files.len(), 1);
    assert!(matches!(svc.get_group(gid).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_files_inherit_group_expiry() {
    let (svc, clock) = service();
    let group = create_group(&svc, &[("ttl", "60")]).await;
    let gid = group.common.id.as_str();

    clock.advance(40);
    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("a.txt", b"a")).await.unwrap();
    let updated = batch.commit().await.unwrap();
    let fid = updated.files[0].id.clone();

    clock.advance(19);
    assert!(svc.get_file(Some(gid), &fid).await.is_ok());

    // rewriting the group did not extend its life
    clock.advance(1);
    assert!(matches!(svc.get_group(gid).await, Err(Error::NotFound)));
    assert!(matches!(svc.get_file(None, &fid).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_cascade_delete() {
    let (svc, _) = service();
    let group = create_group(&svc, &[]).await;
    let gid = group.common.id.as_str();

    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("one.txt", b"1")).await.unwrap();
    batch.add(part("two.txt", b"2")).await.unwrap();
    let updated = batch.commit().await.unwrap();

    svc.delete_group(gid).await.unwrap();

    for file in &updated.files {
        assert!(matches!(svc.get_file(None, &file.id).await, Err(Error::NotFound)));
    }
    assert!(matches!(svc.get_group(gid).await, Err(Error::NotFound)));
    assert!(svc.info(Kind::File).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cascade_skips_missing_files() {
    let (svc, _) = service();
    let group = create_group(&svc, &[]).await;
    let gid = group.common.id.as_str();

    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("one.txt", b"1")).await.unwrap();
    let updated = batch.commit().await.unwrap();
    svc.storage().delete(Kind::File, &updated.files[0].id).await.unwrap();

    svc.delete_group(gid).await.unwrap();
    assert!(matches!(svc.get_group(gid).await, Err(Error::NotFound)));
}

#[tokio::test]
async fn test_group_deleted_during_upload() {
    let (svc, _) = service();
    let group = create_group(&svc, &[]).await;
    let gid = group.common.id.clone();

    let mut batch = svc.begin_upload(&gid).await.unwrap();
    batch.add(part("a.txt", b"a")).await.unwrap();
    batch.add(part("b.txt", b"b")).await.unwrap();
    let written: Vec<String> = batch.files().iter().map(|f| f.id.clone()).collect();

    svc.delete_group(&gid).await.unwrap();

    let err = batch.commit().await.unwrap_err();
    assert!(matches!(err, Error::GroupDeleted(ref id) if *id == gid));
    for id in written {
        assert!(matches!(svc.get_file(None, &id).await, Err(Error::NotFound)));
    }
}

#[tokio::test]
async fn test_aborted_upload_rolls_back() {
    let (svc, _) = service();
    let group = create_group(&svc, &[]).await;
    let gid = group.common.id.as_str();

    let mut batch = svc.begin_upload(gid).await.unwrap();
    batch.add(part("a.txt", b"a")).await.unwrap();
    batch.abort().await;

    assert!(svc.info(Kind::File).await.unwrap().is_empty());
    assert!(svc.get_group(gid).await.unwrap().files.is_empty());
}

#[tokio::test]
async fn test_file_outside_group_has_no_descriptor() {
    let (svc, _) = service();
    let a = create_group(&svc, &[]).await;
    let b = create_group(&svc, &[]).await;

    let mut batch = svc.begin_upload(&a.common.id).await.unwrap();
    batch.add(part("a.txt", b"a")).await.unwrap();
    let updated = batch.commit().await.unwrap();

    let file = svc.get_file(Some(&b.common.id), &updated.files[0].id).await.unwrap();
    assert_eq!(file.contents, b"a");
    assert!(file.descriptor.is_none());
    assert_eq!(file.mime(), "application/octet-stream");
}

#[tokio::test]
async fn test_group_listing_redacted() {
    let (svc, _) = service();
    let group = create_group(&svc, &[("burn", "1")]).await;
    let mut batch = svc.begin_upload(&group.common.id).await.unwrap();
    batch.add(part("a.txt", b"a")).await.unwrap();
    batch.commit().await.unwrap();

    let listing = svc.list(Kind::FileGroup).await.unwrap();
    let v: serde_json::Value = serde_json::from_slice(&listing).unwrap();
    assert!(v["data"][0].get("files").is_none());
}

#[tokio::test]
async fn test_sled_backend_persists() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let store = SledStore::open(dir.path()).unwrap();
        let (svc, _) = service_on(Arc::new(store));
        let t = create_text(&svc, "on disk", &[]).await;
        svc.storage().flush().await.unwrap();
        t.common.id
    };

    let store = SledStore::open(dir.path()).unwrap();
    let (svc, _) = service_on(Arc::new(store));
    let fetched: Text = svc.get(&id).await.unwrap();
    assert_eq!(fetched.text, "on disk");
}

#[tokio::test]
async fn test_sled_backend_burn_and_ttl() {
    let (svc, clock) = service_on(Arc::new(SledStore::temporary().unwrap()));
    let burn = create_text(&svc, "once", &[("burn", "t")]).await;
    let ttl = create_text(&svc, "soon", &[("ttl", "5")]).await;

    assert!(svc.get::<Text>(&burn.common.id).await.is_ok());
    assert!(matches!(svc.get::<Text>(&burn.common.id).await, Err(Error::NotFound)));

    clock.advance(5);
    assert!(matches!(svc.get::<Text>(&ttl.common.id).await, Err(Error::NotFound)));
    assert_eq!(svc.storage().purge_expired().await.unwrap(), 0);
}
