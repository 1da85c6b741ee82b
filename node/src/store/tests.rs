use super::*;
use bpv7::builder::Builder;
use localdisk::LocalDiskPayloadStore;
use memory::{MemoryMetadataStore, MemoryPayloadStore};

fn test_bundle(lifetime_ms: u64) -> Bundle {
    Builder::new()
        .source("dtn://src/".parse().unwrap())
        .destination("dtn://dst/".parse().unwrap())
        .lifetime_millis(lifetime_ms)
        .payload(b"stored payload".to_vec())
        .build()
        .unwrap()
}

fn memory_store() -> Store {
    Store::new(MemoryMetadataStore::new(), MemoryPayloadStore::new())
}

#[tokio::test]
async fn push_is_idempotent() {
    let store = memory_store();
    let bundle = test_bundle(60_000);
    let raw = bundle.to_cbor().unwrap();

    assert_eq!(store.push(&bundle, &raw).await.unwrap(), PushOutcome::New);
    assert_eq!(
        store.push(&bundle, &raw).await.unwrap(),
        PushOutcome::Duplicate
    );

    let key = bundle.id().scrubbed().to_key();
    let item = store.query_id(&key).await.unwrap();
    assert!(item.pending);
    assert_eq!(item.parts.len(), 1);
    assert!(!item.fragmented);

    // Payload bytes are retrievable through the part
    assert_eq!(store.load_part(&item.parts[0]).await.unwrap(), raw);
}

#[tokio::test]
async fn fragments_accumulate_parts() {
    let store = memory_store();
    let bundle = Builder::new()
        .source("dtn://src/".parse().unwrap())
        .destination("dtn://dst/".parse().unwrap())
        .payload(vec![7u8; 600])
        .build()
        .unwrap();

    let fragments = bpv7::fragment::fragment(&bundle, 256).unwrap();
    assert!(fragments.len() >= 2);

    let key = bundle.id().scrubbed().to_key();
    for (i, f) in fragments.iter().enumerate() {
        let raw = f.to_cbor().unwrap();
        let outcome = store.push(f, &raw).await.unwrap();
        if i == 0 {
            assert_eq!(outcome, PushOutcome::New);
        } else {
            assert_eq!(outcome, PushOutcome::NewPart);
        }
        // Replays of the same fragment are duplicates
        assert_eq!(
            store.push(f, &raw).await.unwrap(),
            PushOutcome::Duplicate
        );
    }

    let item = store.query_id(&key).await.unwrap();
    assert!(item.fragmented);
    assert_eq!(item.parts.len(), fragments.len());
}

#[tokio::test]
async fn expiry_reaping() {
    let store = memory_store();

    let expired = test_bundle(0);
    let fresh = Builder::new()
        .source("dtn://other/".parse().unwrap())
        .destination("dtn://dst/".parse().unwrap())
        .lifetime_millis(600_000)
        .payload(b"fresh".to_vec())
        .build()
        .unwrap();

    store
        .push(&expired, &expired.to_cbor().unwrap())
        .await
        .unwrap();
    store.push(&fresh, &fresh.to_cbor().unwrap()).await.unwrap();

    let removed = store.remove_expired().await.unwrap();
    assert_eq!(removed, vec![expired.id().scrubbed().to_key()]);

    assert!(
        store
            .get(&expired.id().scrubbed().to_key())
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store
            .get(&fresh.id().scrubbed().to_key())
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn remove_deletes_record_and_blobs() {
    let store = memory_store();
    let bundle = test_bundle(60_000);
    let raw = bundle.to_cbor().unwrap();
    store.push(&bundle, &raw).await.unwrap();

    let key = bundle.id().scrubbed().to_key();
    let item = store.query_id(&key).await.unwrap();
    store.remove(&key).await.unwrap();

    assert!(store.get(&key).await.unwrap().is_none());
    assert!(matches!(
        store.load_part(&item.parts[0]).await,
        Err(Error::MissingBlob(_))
    ));

    // A second removal and an unknown query behave sensibly
    store.remove(&key).await.unwrap();
    assert!(matches!(
        store.query_id(&key).await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn pending_index() {
    let store = memory_store();
    let bundle = test_bundle(60_000);
    store
        .push(&bundle, &bundle.to_cbor().unwrap())
        .await
        .unwrap();

    assert_eq!(store.pending().await.unwrap().len(), 1);

    let key = bundle.id().scrubbed().to_key();
    let mut item = store.query_id(&key).await.unwrap();
    item.pending = false;
    store.update(&item).await.unwrap();
    assert!(store.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn localdisk_blob_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let payloads = LocalDiskPayloadStore::new(dir.path()).await.unwrap();

    payloads.save("cafe01", b"blob bytes").await.unwrap();
    assert_eq!(
        payloads.load("cafe01").await.unwrap().unwrap(),
        b"blob bytes"
    );
    assert_eq!(payloads.list().await.unwrap(), vec!["cafe01".to_string()]);

    assert!(payloads.load("missing").await.unwrap().is_none());

    payloads.delete("cafe01").await.unwrap();
    assert!(payloads.load("cafe01").await.unwrap().is_none());
    // Deleting twice is fine
    payloads.delete("cafe01").await.unwrap();
}

#[tokio::test]
async fn property_bag_round_trip() {
    let store = memory_store();
    let bundle = test_bundle(60_000);
    store
        .push(&bundle, &bundle.to_cbor().unwrap())
        .await
        .unwrap();

    let key = bundle.id().scrubbed().to_key();
    let mut item = store.query_id(&key).await.unwrap();
    item.set_text_list("routing/epidemic/sent", vec!["dtn://peer/".to_string()]);
    item.set_unsigned("routing/spray/remaining", 4);
    store.update(&item).await.unwrap();

    let item = store.query_id(&key).await.unwrap();
    assert_eq!(
        item.text_list("routing/epidemic/sent"),
        vec!["dtn://peer/".to_string()]
    );
    assert_eq!(item.unsigned("routing/spray/remaining"), Some(4));
    assert_eq!(item.unsigned("absent"), None);
}
