use crate::credentials::{resolve_http_config, HttpAccess};
use crate::error::Error;
use crate::graylog::api::*;
use crate::graylog::assets::{self, *};
use crate::graylog::sync::Session;
use crate::loggingservice_types::SyncPolicy;
use serde::Deserialize;
use serde_json::Value;
use std::io::{Cursor, Read};
use std::path::{Component, Path, PathBuf};
use tracing::*;

const CONTENT_PACKS_URL: &str = "system/content_packs";
const CONTENT_PACKS_DIR: &str = "content-packs";
const BACKEND_CONFIG_DIRS: [&str; 2] = ["opensearch-configs", "elasticsearch-configs"];
const SNAPSHOT_REPOSITORY_URL: &str = "_snapshot/archives";
const MAX_ARCHIVE_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Replaces the bundled dashboards pack. Graylog refuses to delete a pack
/// that still has installations, so those go first.
pub async fn sync_content_pack(session: &Session<'_>) -> Result<(), Error> {
    let policy = session.plan.policy;
    let packs = fetch_entities(session.graylog, CONTENT_PACKS_URL, Some("content_packs")).await?;
    let exists = packs.iter().any(|p| p.id.eq_ignore_ascii_case(CONTENT_PACK_ID));
    if exists && policy == SyncPolicy::ForceUpdate {
        delete_content_pack(session.graylog).await?;
    }
    if policy == SyncPolicy::ForceUpdate || !exists {
        info!(content_pack = CONTENT_PACK_ID, "Installing dashboards content pack");
        send(
            session.graylog,
            Method::Post,
            CONTENT_PACKS_URL,
            Some(&assets::content_pack()),
            &[201],
            "upload content pack",
        )
        .await?;
        send(
            session.graylog,
            Method::Post,
            &format!(
                "{}/{}/{}/installations",
                CONTENT_PACKS_URL, CONTENT_PACK_ID, CONTENT_PACK_REVISION
            ),
            Some(&assets::content_pack_installation()),
            &[200],
            "install content pack",
        )
        .await?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct Installation {
    #[serde(rename = "_id", default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct Installations {
    #[serde(default)]
    installations: Vec<Installation>,
}

async fn delete_content_pack(api: &dyn RestApi) -> Result<(), Error> {
    let url = format!("{}/{}/installations", CONTENT_PACKS_URL, CONTENT_PACK_ID);
    let value = get_json(api, &url, "get content pack installations").await?;
    let installations: Installations =
        serde_json::from_value(value).map_err(|e| Error::ParseFailed(url.clone(), e))?;
    for installation in installations.installations {
        send(
            api,
            Method::Delete,
            &format!("{}/{}", url, installation.id),
            None,
            &[200],
            "delete content pack installation",
        )
        .await?;
    }
    send(
        api,
        Method::Delete,
        &format!("{}/{}", CONTENT_PACKS_URL, CONTENT_PACK_ID),
        None,
        &[204],
        "delete content pack",
    )
    .await?;
    Ok(())
}

/// Joins an archive entry name onto `dest`, refusing anything that would
/// land outside of it.
pub fn safe_join(dest: &Path, name: &str) -> Result<PathBuf, Error> {
    let relative = Path::new(name);
    let escapes = relative.components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    });
    if escapes || name.is_empty() {
        return Err(Error::IllegalArchivePath(name.to_string()));
    }
    Ok(dest.join(relative))
}

/// Extracts every entry of the archive under `dest` and returns the written
/// files. Entries larger than `max_entry` bytes are rejected.
pub fn unzip(bytes: &[u8], dest: &Path, max_entry: u64) -> Result<Vec<PathBuf>, Error> {
    let origin = dest.display().to_string();
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::ArchiveFailed(origin.clone(), e))?;
    let mut written = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::ArchiveFailed(origin.clone(), e))?;
        let name = entry.name().to_string();
        let target = safe_join(dest, &name)?;
        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io("create directory", e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("create directory", e))?;
        }
        if entry.size() > max_entry {
            return Err(Error::ArchiveEntryTooLarge(name, max_entry));
        }
        let mut content = Vec::new();
        (&mut entry)
            .take(max_entry + 1)
            .read_to_end(&mut content)
            .map_err(|e| Error::io(format!("read {} from archive", name), e))?;
        if content.len() as u64 > max_entry {
            return Err(Error::ArchiveEntryTooLarge(name, max_entry));
        }
        std::fs::write(&target, content)
            .map_err(|e| Error::io(format!("write {}", target.display()), e))?;
        written.push(target);
    }
    Ok(written)
}

/// Regular files of `dir` sorted by name; a missing directory has none.
pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "Directory not found");
            return Ok(Vec::new());
        }
        Err(e) => return Err(Error::io(format!("read {}", dir.display()), e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io(format!("read {}", dir.display()), e))?
    {
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub async fn read_json(path: &Path) -> Result<Value, Error> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| Error::io(format!("read {}", path.display()), e))?;
    serde_json::from_slice(&raw).map_err(|e| Error::ParseFailed(path.display().to_string(), e))
}

fn file_name(url: &str) -> &str {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

async fn download(session: &Session<'_>, url: &str, access: &HttpAccess) -> Result<(), Error> {
    let work_dir = &session.plan.work_dir;
    let name = file_name(url);
    if name.ends_with(".zip") {
        let bytes = session.content.fetch(url, access).await?;
        let files = unzip(&bytes, work_dir, MAX_ARCHIVE_ENTRY_BYTES)?;
        debug!(url, files = files.len(), "Content pack archive extracted");
    } else if name.ends_with(".json") {
        let bytes = session.content.fetch(url, access).await?;
        let target = work_dir.join(CONTENT_PACKS_DIR).join(name);
        tokio::fs::create_dir_all(work_dir.join(CONTENT_PACKS_DIR))
            .await
            .map_err(|e| Error::io("create content packs directory", e))?;
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| Error::io(format!("write {}", target.display()), e))?;
    } else {
        error!(url, "Incorrect content pack, it should be zip or json");
    }
    Ok(())
}

/// Downloads every external pack into the work directory, then uploads the
/// whole `content-packs` directory. Uploaded files are removed.
pub async fn ingest_external_packs(session: &Session<'_>) -> Result<(), Error> {
    let plan = session.plan;
    for url in &plan.content_pack_paths {
        download(session, url, &HttpAccess::default()).await?;
    }
    for source in &plan.content_packs {
        let access = resolve_http_config(session.platform, source.http_config.as_ref()).await?;
        download(session, &source.url, &access).await?;
    }
    for file in list_files(&plan.work_dir.join(CONTENT_PACKS_DIR)).await? {
        let body = read_json(&file).await?;
        info!(file = %file.display(), "Uploading content pack");
        send(
            session.graylog,
            Method::Post,
            CONTENT_PACKS_URL,
            Some(&body),
            &[201],
            &format!("upload content pack {}", file.display()),
        )
        .await?;
        tokio::fs::remove_file(&file)
            .await
            .map_err(|e| Error::io(format!("remove {}", file.display()), e))?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct BackendRequest {
    method: String,
    url: String,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BackendRequests {
    #[serde(default)]
    requests: Vec<BackendRequest>,
}

fn parse_method(raw: &str) -> Result<Method, Error> {
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::Get),
        "POST" => Ok(Method::Post),
        "PUT" => Ok(Method::Put),
        "DELETE" => Ok(Method::Delete),
        other => Err(Error::Configuration(format!("unsupported request method {}", other))),
    }
}

/// Replays the request bundles shipped with external content. The backend's
/// answers are only logged.
pub async fn replay_backend_requests(session: &Session<'_>) -> Result<(), Error> {
    let Some(search) = session.search else {
        return Ok(());
    };
    for dir in BACKEND_CONFIG_DIRS {
        for file in list_files(&session.plan.work_dir.join(dir)).await? {
            let bundle: BackendRequests = serde_json::from_value(read_json(&file).await?)
                .map_err(|e| Error::ParseFailed(file.display().to_string(), e))?;
            for request in bundle.requests {
                let method = parse_method(&request.method)?;
                let body = request.body.map(|b| b.to_string());
                let response = search.call(method, &request.url, body.as_deref()).await?;
                debug!(%method, url = %request.url, status = response.status, body = %response.body, "Search backend answered");
            }
        }
    }
    Ok(())
}

/// Repository location for archived indices; the bundled path follows the
/// backend flavour.
pub fn archive_location(path_repo: Option<&str>, search_host: &str) -> String {
    match path_repo {
        Some(repo) => format!("{}/graylog", repo.trim_end_matches('/')),
        None if search_host.contains("opensearch") => {
            DEFAULT_SNAPSHOT_LOCATION.replacen("elasticsearch", "opensearch", 1)
        }
        None => DEFAULT_SNAPSHOT_LOCATION.to_string(),
    }
}

pub async fn register_archives(session: &Session<'_>) -> Result<(), Error> {
    let (Some(search), Some(host)) = (session.search, session.plan.search_host.as_deref()) else {
        return Ok(());
    };
    let location = archive_location(session.plan.path_repo.as_deref(), host);
    let body = assets::archive_repository(&location).to_string();
    let response = search
        .call(Method::Put, SNAPSHOT_REPOSITORY_URL, Some(&body))
        .await?;
    debug!(location, status = response.status, body = %response.body, "Snapshot repository registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graylog::sync::Plan;
    use crate::loggingservice_types::*;
    use crate::testing::*;
    use serde_json::json;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_safe_join_rejects_escaping_paths() {
        let dest = Path::new("/work");
        assert_eq!(
            safe_join(dest, "content-packs/pack.json").unwrap(),
            PathBuf::from("/work/content-packs/pack.json")
        );
        for name in ["../etc/passwd", "/etc/passwd", "content-packs/../../x", ""] {
            assert!(matches!(safe_join(dest, name), Err(Error::IllegalArchivePath(_))), "{}", name);
        }
        assert_eq!(
            safe_join(dest, "../x").unwrap_err().to_string(),
            "../x: illegal file path"
        );
    }

    #[test]
    fn test_unzip_writes_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = archive(&[
            ("content-packs/a.json", "{\"id\":\"a\"}"),
            ("opensearch-configs/requests.json", "{\"requests\":[]}"),
        ]);
        let files = unzip(&bytes, dir.path(), MAX_ARCHIVE_ENTRY_BYTES).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("content-packs/a.json")).unwrap(),
            "{\"id\":\"a\"}"
        );
    }

    #[test]
    fn test_unzip_rejects_oversized_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = archive(&[("content-packs/a.json", "{}"), ("content-packs/big.json", "[1,2,3,4]")]);
        let err = unzip(&bytes, dir.path(), 4).unwrap_err();
        assert_eq!(err.to_string(), "content-packs/big.json: archive entry is larger than 4 bytes");
        assert!(!dir.path().join("content-packs/big.json").exists());
    }

    #[test]
    fn test_archive_location() {
        assert_eq!(
            archive_location(None, "http://opensearch.logging:9200"),
            "/usr/share/opensearch/snapshots/graylog"
        );
        assert_eq!(
            archive_location(None, "http://elasticsearch:9200"),
            DEFAULT_SNAPSHOT_LOCATION
        );
        assert_eq!(archive_location(Some("/snapshots/"), "http://opensearch"), "/snapshots/graylog");
        assert_eq!(file_name("http://host/packs/a.zip?token=1"), "a.zip");
    }

    #[tokio::test]
    async fn test_external_packs_are_extracted_and_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut graylog = graylog_spec();
        graylog.content_pack_paths = Some(
            "http://packs/bundle.zip,http://packs/extra.json,http://packs/readme.txt".to_string(),
        );
        let mut fx = SyncFixture::new(Plan::new(
            &graylog,
            SyncPolicy::OnlyCreate,
            "admin",
            dir.path(),
            Some("http://opensearch:9200"),
        ));
        let zip = archive(&[
            ("content-packs/bundled.json", "{\"id\":\"bundled\"}"),
            (
                "opensearch-configs/templates.json",
                "{\"requests\":[{\"method\":\"put\",\"url\":\"_template/graylog\",\"body\":{\"order\":1}}]}",
            ),
        ]);
        fx.content
            .expect_fetch()
            .withf(|url, access| url == "http://packs/bundle.zip" && access.auth == Auth::Anonymous)
            .times(1)
            .returning(move |_, _| Ok(zip.clone()));
        fx.content
            .expect_fetch()
            .withf(|url, _| url == "http://packs/extra.json")
            .times(1)
            .returning(|_, _| Ok(b"{\"id\":\"extra\"}".to_vec()));
        let search = RecordingApi::new();
        let session = Session {
            search: Some(&search),
            ..fx.session()
        };

        ingest_external_packs(&session).await.unwrap();
        replay_backend_requests(&session).await.unwrap();

        let uploaded: Vec<Value> = fx.graylog.state.lock().unwrap().content_packs.clone();
        assert_eq!(uploaded, vec![json!({"id": "bundled"}), json!({"id": "extra"})]);
        assert!(!dir.path().join("bundle.zip").exists());
        assert!(list_files(&dir.path().join(CONTENT_PACKS_DIR)).await.unwrap().is_empty());
        assert_eq!(
            search.calls(),
            vec![(
                Method::Put,
                "_template/graylog".to_string(),
                Some("{\"order\":1}".to_string())
            )]
        );
    }

    #[tokio::test]
    async fn test_content_pack_tls_sources_use_resolved_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let mut graylog = graylog_spec();
        graylog.content_packs = vec![ContentPackSource {
            url: "https://packs/secure.json".to_string(),
            http_config: Some(HttpConfig {
                credentials: Some(Credentials {
                    token: Some(k8s_openapi::api::core::v1::SecretKeySelector {
                        name: Some("packs".to_string()),
                        key: "token".to_string(),
                        optional: None,
                    }),
                    ..Credentials::default()
                }),
                tls_config: None,
            }),
        }];
        let mut fx = SyncFixture::new(Plan::new(&graylog, SyncPolicy::OnlyCreate, "admin", dir.path(), None));
        fx.content
            .expect_fetch()
            .withf(|_, access| access.auth == Auth::Bearer("t0ken".to_string()) && access.tls.insecure)
            .times(1)
            .returning(|_, _| Ok(b"{\"id\":\"secure\"}".to_vec()));
        fx.platform = FakePlatform::new().with_secret(secret("packs", &[("token", "t0ken")]));
        ingest_external_packs(&fx.session()).await.unwrap();
        assert_eq!(fx.graylog.state.lock().unwrap().content_packs.len(), 1);
    }

    #[tokio::test]
    async fn test_only_create_keeps_existing_content_pack() {
        let fx = SyncFixture::with_policy(SyncPolicy::OnlyCreate);
        sync_content_pack(&fx.session()).await.unwrap();
        fx.graylog.clear_calls();
        sync_content_pack(&fx.session()).await.unwrap();
        assert!(fx.graylog.writes().is_empty());
    }

    #[tokio::test]
    async fn test_archive_repository_follows_backend_flavour() {
        let fx = SyncFixture::new(Plan::new(
            &graylog_spec(),
            SyncPolicy::OnlyCreate,
            "admin",
            Path::new("/tmp"),
            Some("https://opensearch.logging:9200"),
        ));
        let search = RecordingApi::new();
        register_archives(&Session {
            search: Some(&search),
            ..fx.session()
        })
        .await
        .unwrap();
        let calls = search.calls();
        assert_eq!(calls[0].0, Method::Put);
        assert_eq!(calls[0].1, SNAPSHOT_REPOSITORY_URL);
        let body: Value = serde_json::from_str(calls[0].2.as_deref().unwrap()).unwrap();
        assert_eq!(body["settings"]["location"], "/usr/share/opensearch/snapshots/graylog");
    }
}
