#![expect(clippy::indexing_slicing, reason = "test")]

use {
    crate::{
        harness::{
            TestServer, catalog_entry, decrypt_output, encrypt_archived, sample_plaintext,
        },
        mock_store::MockStore,
    },
    base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD},
    byte_unit::Byte,
    rangecrypt_protocol::{
        AesBits, EncryptionFormat,
        endpoints::{SESSION_ID_HEADER, SESSION_RESPONSE_HEADER},
    },
    rangecrypt_sdk::{EngineConfig, crypto::Iv, engine::ReadStrategy},
    reqwest::{
        StatusCode,
        header::{CONTENT_LENGTH, CONTENT_RANGE},
    },
};

const FILE_SIZE: usize = 100_000;
const CLIENT_KEY: &str = "client secret";

struct Setup {
    store: MockStore,
    server: TestServer,
    plaintext: Vec<u8>,
}

fn engine_config(strategy: ReadStrategy) -> EngineConfig {
    EngineConfig {
        page_size: Byte::from_u64(16 * 1024),
        read_strategy: strategy,
        ..EngineConfig::default()
    }
}

async fn setup(strategy: ReadStrategy) -> Setup {
    let store = MockStore::start().await.unwrap();
    let plaintext = sample_plaintext(FILE_SIZE);
    let stored = encrypt_archived(&plaintext, AesBits::Aes128, [0x42; 16]);
    let stored_len = stored.len();
    store.insert("archive/aes.bin", stored);
    store.insert("archive/plain.bin", plaintext.clone());
    store.insert("archive/file.gpg", b"-----BEGIN PGP MESSAGE-----".to_vec());

    let catalog = vec![
        catalog_entry(
            "EGAF0001",
            store.url("archive/aes.bin"),
            stored_len,
            EncryptionFormat::Aes(AesBits::Aes128),
        ),
        catalog_entry(
            "EGAF0002",
            store.url("archive/plain.bin"),
            FILE_SIZE,
            EncryptionFormat::Plain,
        ),
        catalog_entry(
            "EGAF0003",
            store.url("archive/file.gpg"),
            27,
            EncryptionFormat::SymmetricGpg,
        ),
        catalog_entry(
            "EGAF0004",
            store.url("archive/missing.bin"),
            1040,
            EncryptionFormat::Aes(AesBits::Aes256),
        ),
    ];
    let server = TestServer::start(engine_config(strategy), catalog)
        .await
        .unwrap();
    Setup {
        store,
        server,
        plaintext,
    }
}

#[tokio::test]
async fn whole_file_as_plaintext() {
    for strategy in [ReadStrategy::Paged, ReadStrategy::Direct] {
        let setup = setup(strategy).await;
        let response = setup
            .server
            .get("/file/archive/EGAF0001")
            .header(SESSION_ID_HEADER, "client-session-1")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session = response.headers()[SESSION_RESPONSE_HEADER]
            .to_str()
            .unwrap()
            .to_owned();
        assert_eq!(session.len(), 36);
        assert_eq!(response.headers()[CONTENT_LENGTH], "100000");
        assert!(response.headers().get(CONTENT_RANGE).is_none());
        let body = response.bytes().await.unwrap();
        assert_eq!(body[..], setup.plaintext[..], "{strategy:?}");
        setup.server.stop().await.unwrap();
    }
}

#[tokio::test]
async fn range_reencrypted_with_generated_iv() {
    let setup = setup(ReadStrategy::Paged).await;
    let response = setup
        .server
        .get(&format!(
            "/file/archive/EGAF0001?destinationFormat=aes256&destinationKey={CLIENT_KEY}\
            &startCoordinate=1000&endCoordinate=50000"
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 1000-49999/100000");
    assert_eq!(response.headers()[CONTENT_LENGTH], "49016");
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 49_016);
    let iv: Iv = body[..16].try_into().unwrap();
    let decrypted = decrypt_output(&body[16..], CLIENT_KEY, AesBits::Aes256, &iv, 0);
    assert_eq!(decrypted, setup.plaintext[1000..50_000]);
}

#[tokio::test]
async fn supplied_iv_aligns_start() {
    let setup = setup(ReadStrategy::Direct).await;
    let iv: Iv = [0x24; 16];
    let response = setup
        .server
        .get(&format!(
            "/file/archive/EGAF0001?destinationFormat=aes128&destinationKey={CLIENT_KEY}\
            &destinationIV={}&startCoordinate=1001&endCoordinate=2000",
            BASE64_URL_SAFE_NO_PAD.encode(iv)
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 992-1999/100000");
    let body = response.bytes().await.unwrap();
    assert_eq!(body.len(), 1008);
    let decrypted = decrypt_output(&body, CLIENT_KEY, AesBits::Aes128, &iv, 992);
    assert_eq!(decrypted, setup.plaintext[992..2000]);
}

#[tokio::test]
async fn strict_byte_ranges() {
    let setup = setup(ReadStrategy::Paged).await;
    for id in ["EGAF0001", "EGAF0002"] {
        let response = setup
            .server
            .get(&format!("/file/archive/{id}/bytes?start=10&end=19"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 10-19/100000");
        assert_eq!(response.bytes().await.unwrap()[..], setup.plaintext[10..20]);

        for query in ["start=-1&end=5", "start=20&end=10", "start=0&end=100000"] {
            let response = setup
                .server
                .get(&format!("/file/archive/{id}/bytes?{query}"))
                .send()
                .await
                .unwrap();
            assert_eq!(
                response.status(),
                StatusCode::RANGE_NOT_SATISFIABLE,
                "{id} {query}"
            );
        }
    }
}

#[tokio::test]
async fn file_size() {
    let setup = setup(ReadStrategy::Paged).await;
    for id in ["EGAF0001", "EGAF0002"] {
        let response = setup
            .server
            .get(&format!("/file/archive/{id}/size"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "100000");
    }
}

#[tokio::test]
async fn rejected_requests() {
    let setup = setup(ReadStrategy::Paged).await;
    let status = |path: &'static str| {
        let request = setup.server.get(path);
        async move { request.send().await.unwrap().status() }
    };

    assert_eq!(
        setup
            .server
            .anonymous_get("/file/archive/EGAF0001")
            .send()
            .await
            .unwrap()
            .status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        setup
            .server
            .anonymous_get("/file/archive/EGAF0001")
            .bearer_auth("wrongToken0123456789")
            .send()
            .await
            .unwrap()
            .status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(status("/file/archive/UNKNOWN").await, StatusCode::NOT_FOUND);
    assert_eq!(status("/elsewhere").await, StatusCode::NOT_FOUND);
    assert_eq!(
        status("/file/archive/EGAF0001?startCoordinate=-5").await,
        StatusCode::RANGE_NOT_SATISFIABLE
    );
    assert_eq!(
        status("/file/archive/EGAF0001?startCoordinate=200000").await,
        StatusCode::RANGE_NOT_SATISFIABLE
    );
    assert_eq!(
        status("/file/archive/EGAF0001?destinationFormat=aes128").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        status("/file/archive/EGAF0001?destinationFormat=rot13").await,
        StatusCode::BAD_REQUEST
    );

    let before = setup.store.requests();
    assert_eq!(
        status("/file/archive/EGAF0001?destinationFormat=symmetricgpg").await,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    assert_eq!(
        status("/file/archive/EGAF0002?destinationFormat=publicgpg_sanger").await,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    assert_eq!(setup.store.requests(), before);

    assert_eq!(
        status("/file/archive/EGAF0003").await,
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    assert_eq!(setup.store.requests(), before);

    assert_eq!(status("/file/archive/EGAF0004").await, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn truncated_remote_aborts_response() {
    for strategy in [ReadStrategy::Paged, ReadStrategy::Direct] {
        let setup = setup(strategy).await;
        setup.store.truncate_at("archive/aes.bin", 16 + 50_000);
        let response = setup
            .server
            .get("/file/archive/EGAF0001")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{strategy:?}");
        assert!(response.bytes().await.is_err(), "{strategy:?}");
    }
}

#[tokio::test]
async fn remote_credentials_from_url() {
    let store = MockStore::start().await.unwrap();
    let plaintext = sample_plaintext(1000);
    store.insert("secure/plain.bin", plaintext.clone());
    // "reader:s3cret"
    store.require_authorization("secure/plain.bin", "Basic cmVhZGVyOnMzY3JldA==");
    let catalog = vec![catalog_entry(
        "SECURE",
        store.url_with_credentials("secure/plain.bin", "reader", "s3cret"),
        1000,
        EncryptionFormat::Plain,
    )];
    let server = TestServer::start(engine_config(ReadStrategy::Paged), catalog)
        .await
        .unwrap();

    let response = server
        .get("/file/archive/SECURE?startCoordinate=100&endCoordinate=200")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.bytes().await.unwrap()[..], plaintext[100..200]);
    server.stop().await.unwrap();
}
