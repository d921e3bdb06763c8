//! Input preparation against a mock blob server.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use scanprep_fetch::{sha256_hex, FetchError};
use scanprep_input::{
    Argument, ArgumentType, Config, InputError, InputKind, InputPreparer, TaskDescriptor,
    ToolConfig, IMAGE_ARCHIVE_NAME,
};
use scanprep_image::{BlobReference, ImageError};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct RangeResponder {
    body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("bytes="))
            .and_then(|v| v.split_once('-'))
            .and_then(|(s, e)| Some((s.parse::<usize>().ok()?, e.parse::<usize>().ok()?)));
        match range {
            Some((start, end)) => {
                ResponseTemplate::new(206).set_body_bytes(self.body[start..=end].to_vec())
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

async fn serve(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string())
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangeResponder {
            body: body.to_vec(),
        })
        .mount(server)
        .await;
}

fn preparer(work: &TempDir) -> InputPreparer {
    let config = Config {
        work_dir: work.path().join("workspace"),
        max_retries: 0,
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(10),
        ..Default::default()
    };
    InputPreparer::from_config(config).unwrap()
}

fn arg(kind: ArgumentType, key: &str, value: &str) -> Argument {
    Argument {
        kind,
        key: key.to_string(),
        value: value.to_string(),
        des: String::new(),
    }
}

fn blob(server: &MockServer, route: &str, name: &str, content: &[u8]) -> BlobReference {
    BlobReference {
        url: format!("{}{}", server.uri(), route),
        name: name.to_string(),
        sha256: sha256_hex(content),
        size: content.len() as u64,
    }
}

fn task(args: Vec<Argument>, file_urls: Vec<BlobReference>) -> TaskDescriptor {
    TaskDescriptor {
        task_id: "task-1".to_string(),
        tool_config: ToolConfig { args },
        file_urls,
        ..Default::default()
    }
}

async fn read_to_vec(file: &mut tokio::fs::File) -> Vec<u8> {
    let mut data = Vec::new();
    file.read_to_end(&mut data).await.unwrap();
    data
}

#[tokio::test]
async fn test_single_file_stream_download() {
    let server = MockServer::start().await;
    let body = b"PK\x03\x04 fake jar".to_vec();
    serve(&server, "/artifact", &body).await;
    let work = TempDir::new().unwrap();
    let preparer = preparer(&work);

    let mut input = preparer
        .prepare(&task(vec![], vec![blob(&server, "/artifact", "libs/app.jar", &body)]))
        .await
        .unwrap();

    assert_eq!(input.kind, InputKind::Artifact);
    assert_eq!(input.path, work.path().join("workspace/app.jar"));
    assert_eq!(read_to_vec(&mut input.file).await, body);
}

#[tokio::test]
async fn test_single_file_chunked_download_with_headers() {
    let server = MockServer::start().await;
    let body: Vec<u8> = (0..5000u32).map(|i| (i % 241) as u8).collect();
    Mock::given(method("HEAD"))
        .and(path("/big"))
        .and(header("x-token", "abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string())
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/big"))
        .and(header("x-token", "abc"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let preparer = preparer(&work);
    let task = task(
        vec![
            arg(ArgumentType::Number, "downloaderWorkerCount", "3"),
            arg(ArgumentType::String, "downloaderWorkerHeaders", "X-Token: abc"),
        ],
        vec![blob(&server, "/big", "big.bin", &body)],
    );

    let mut input = preparer.prepare(&task).await.unwrap();

    assert_eq!(read_to_vec(&mut input.file).await, body);
}

#[tokio::test]
async fn test_integrity_failure_removes_file() {
    let server = MockServer::start().await;
    serve(&server, "/artifact", b"tampered").await;
    let work = TempDir::new().unwrap();
    let preparer = preparer(&work);

    let err = preparer
        .prepare(&task(
            vec![],
            vec![blob(&server, "/artifact", "app.jar", b"original")],
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        InputError::Fetch(FetchError::Integrity { .. })
    ));
    assert!(!work.path().join("workspace/app.jar").exists());
}

#[tokio::test]
async fn test_image_mode_reconstructs_archive() {
    let server = MockServer::start().await;
    let config = b"config".to_vec();
    let layer = b"layer1".to_vec();
    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "size": 6, "digest": format!("sha256:{}", sha256_hex(&config))},
        "layers": [
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 6, "digest": format!("sha256:{}", sha256_hex(&layer))},
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 6, "digest": format!("sha256:{}", sha256_hex(&layer))}
        ]
    }))
    .unwrap();
    serve(&server, "/manifest", &manifest).await;
    serve(&server, "/config", &config).await;
    serve(&server, "/layer", &layer).await;

    let work = TempDir::new().unwrap();
    let preparer = preparer(&work);
    let task = task(
        vec![arg(ArgumentType::String, "packageType", "DOCKER")],
        vec![
            blob(&server, "/manifest", "manifest.json", &manifest),
            blob(&server, "/config", "config", &config),
            blob(&server, "/layer", "layer", &layer),
        ],
    );

    let mut input = preparer.prepare(&task).await.unwrap();

    assert_eq!(input.kind, InputKind::Image);
    assert_eq!(input.path, work.path().join("workspace").join(IMAGE_ARCHIVE_NAME));

    let raw = read_to_vec(&mut input.file).await;
    let mut archive = tar::Archive::new(raw.as_slice());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| String::from_utf8(e.unwrap().path_bytes().into_owned()).unwrap())
        .collect();
    assert_eq!(names.len(), 6);
    assert_eq!(names.last().unwrap(), "manifest.json");

    let layer_gets = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.method.as_str() == "GET" && r.url.path() == "/layer")
        .count();
    assert_eq!(layer_gets, 1);
}

#[tokio::test]
async fn test_local_file_shortcut() {
    let work = TempDir::new().unwrap();
    let local = work.path().join("target.bin");
    std::fs::write(&local, b"local bytes").unwrap();
    let preparer = preparer(&work);
    let task = TaskDescriptor {
        file_path: Some(local.clone()),
        ..Default::default()
    };

    let mut input = preparer.prepare(&task).await.unwrap();

    assert_eq!(input.kind, InputKind::Local);
    assert_eq!(input.path, local);
    assert_eq!(read_to_vec(&mut input.file).await, b"local bytes");
}

#[tokio::test]
async fn test_malformed_header_spec_keeps_existing_file() {
    let server = MockServer::start().await;
    let work = TempDir::new().unwrap();
    let existing = work.path().join("workspace/app.jar");
    std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
    std::fs::write(&existing, b"earlier download").unwrap();
    let preparer = preparer(&work);
    let task = task(
        vec![arg(ArgumentType::String, "downloaderWorkerHeaders", "no-colon-here")],
        vec![blob(&server, "/artifact", "app.jar", b"x")],
    );

    let err = preparer.prepare(&task).await.unwrap_err();

    assert!(matches!(err, InputError::Config(_)));
    assert_eq!(std::fs::read(&existing).unwrap(), b"earlier download");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_http_error_keeps_existing_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/artifact"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let existing = work.path().join("workspace/app.jar");
    std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
    std::fs::write(&existing, b"earlier download").unwrap();

    let err = preparer(&work)
        .prepare(&task(vec![], vec![blob(&server, "/artifact", "app.jar", b"x")]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        InputError::Fetch(FetchError::HttpStatus { .. })
    ));
    assert_eq!(std::fs::read(&existing).unwrap(), b"earlier download");
}

#[tokio::test]
async fn test_cancel_stops_stream_mode_image_build() {
    let server = MockServer::start().await;
    let config = b"config".to_vec();
    let layer = b"layer1".to_vec();
    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "size": 6, "digest": format!("sha256:{}", sha256_hex(&config))},
        "layers": [
            {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 6, "digest": format!("sha256:{}", sha256_hex(&layer))}
        ]
    }))
    .unwrap();
    serve(&server, "/manifest", &manifest).await;
    serve(&server, "/config", &config).await;
    Mock::given(method("GET"))
        .and(path("/layer"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(layer.clone())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let work = TempDir::new().unwrap();
    let preparer = preparer(&work);
    let task = task(
        vec![arg(ArgumentType::String, "packageType", "DOCKER")],
        vec![
            blob(&server, "/manifest", "manifest.json", &manifest),
            blob(&server, "/config", "config", &config),
            blob(&server, "/layer", "layer", &layer),
        ],
    );
    let cancel = preparer.cancellation_token();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = preparer.prepare(&task).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(
        err,
        InputError::Image(ImageError::Fetch(FetchError::Cancelled))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!work.path().join("workspace").join(IMAGE_ARCHIVE_NAME).exists());
}

#[tokio::test]
async fn test_task_without_files() {
    let work = TempDir::new().unwrap();

    let err = preparer(&work)
        .prepare(&TaskDescriptor::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InputError::NoInput));
}

#[tokio::test]
async fn test_download_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let config = Config {
        work_dir: work.path().join("workspace"),
        max_retries: 0,
        download_timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let preparer = InputPreparer::from_config(config).unwrap();

    let err = preparer
        .prepare(&task(vec![], vec![blob(&server, "/slow", "slow.bin", b"late")]))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(!work.path().join("workspace/slow.bin").exists());
}

#[tokio::test]
async fn test_extract_archive_from_url() {
    let mut builder = tar::Builder::new(Vec::new());
    let data = b"{\"Version\":2}";
    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(data.len() as u64);
    builder
        .append_data(&mut header, "metadata.json", &data[..])
        .unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    let archive = encoder.finish().unwrap();

    let server = MockServer::start().await;
    serve(&server, "/db.tar.gz", &archive).await;
    let work = TempDir::new().unwrap();
    let dest = work.path().join("db");

    let summary = preparer(&work)
        .extract_archive(&format!("{}/db.tar.gz", server.uri()), &dest)
        .await
        .unwrap();

    assert_eq!(summary.files, 1);
    assert_eq!(std::fs::read(dest.join("metadata.json")).unwrap(), data);
}
