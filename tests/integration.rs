//! Integration tests for the zhf CLI.
//!
//! These run the binary against scratch data directories. Hydra is stood in for by a local
//! HTTP server serving fixed pages.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::Path;
use tempfile::tempdir;

/// Get a command for the zhf binary.
fn zhf() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("zhf").unwrap();
    cmd.env_remove("ZHF_DATA_DIR")
        .env_remove("ZHF_PUBLIC_DIR")
        .env_remove("ZHF_LOG")
        .env_remove("ZHF_LOG_FILE")
        .env_remove("RUST_LOG")
        .env_remove("ZHF_HYDRA_URL")
        .env_remove("http_proxy")
        .env_remove("https_proxy")
        .env_remove("HTTP_PROXY")
        .env_remove("HTTPS_PROXY")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy");
    cmd
}

/// Serve `pages` by request path on a local port and return the base URL.
fn fake_hydra(pages: Vec<(String, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut header = String::new();
            while reader.read_line(&mut header).unwrap() > 2 {
                header.clear();
            }

            let path = request_line.split_whitespace().nth(1).unwrap_or_default();
            let (status, body) = match pages.iter().find(|(p, _)| p == path) {
                Some((_, body)) => ("200 OK", body.as_str()),
                None => ("404 Not Found", "not found"),
            };
            let _ = write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
        }
    });

    url
}

fn eval_row(id: u64, time: &str, badges: &str) -> String {
    format!(
        r#"<tr><td><a href="/eval/{id}">{id}</a></td><td><time title="{time}">ago</time></td><td>{badges}</td></tr>"#
    )
}

fn evals_page(rows: &[String]) -> String {
    format!("<html><body><table><tbody>{}</tbody></table></body></html>", rows.concat())
}

fn build_page(job: &str, dep_name: &str, dep_build: u64) -> String {
    format!(
        r#"<html><body>
<div id="tabs-summary"><table class="info-table"><tr><td><tt>x86_64-linux</tt></td></tr></table></div>
<div id="tabs-details"><table class="info-table">
<tr><td><tt>nixos</tt></td></tr><tr><td><tt>trunk-combined</tt></td></tr><tr><td><tt>{job}</tt></td></tr>
</table></div>
<div id="tabs-buildsteps"><table class="clickable-rows"><tbody>
<tr><td>1</td><td><tt>/nix/store/0123456789abcdfghijklmnpqrsvwxyz-{dep_name}</tt></td><td></td><td></td>
<td>Failed (<a href="/build/{dep_build}/nixlog/1">log</a>)</td></tr>
</tbody></table></div>
</body></html>"#
    )
}

fn write_file(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A stand-in for `nix` that answers `eval` calls from a fixed table.
#[cfg(unix)]
fn fake_nix(dir: &Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("nix");
    std::fs::write(
        &path,
        r#"#!/bin/sh
case "$5" in
  hello.*) echo '[{"github":"alice","name":"Alice"},{"name":"No Handle"}]' ;;
  orphan.*) echo '[]' ;;
  *) echo "error: attribute missing" >&2; exit 1 ;;
esac
"#,
    )
    .unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays() {
    zhf()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("crawl-jobset"))
        .stdout(predicate::str::contains("crawl-evals"))
        .stdout(predicate::str::contains("failed-deps"))
        .stdout(predicate::str::contains("fetch-maintainers"))
        .stdout(predicate::str::contains("render-maintainers"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_version_displays() {
    zhf()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("zhf"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions_bash() {
    zhf()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_zhf()"));
}

#[test]
fn test_verbose_conflicts_with_quiet() {
    zhf()
        .args(["-v", "-q", "render-maintainers", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// Argument Validation Tests
// ============================================================================

#[test]
fn test_fetch_maintainers_wrong_arity() {
    let dir = tempdir().unwrap();
    zhf()
        .args(["--data-dir", dir.path().to_str().unwrap(), "--no-color"])
        .args(["fetch-maintainers", "1803", "abc123"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("triples"));
}

#[test]
fn test_crawl_evals_bad_context() {
    zhf()
        .args(["crawl-evals", "1803", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown context"));
}

// ============================================================================
// Hydra Crawling Tests
// ============================================================================

#[test]
fn test_crawl_jobset_prints_newest_finished_eval() {
    let page = evals_page(&[
        eval_row(
            1803,
            "2024-05-02 10:00:00 UTC",
            r#"<span class="badge badge-success">1</span><span class="badge badge-secondary">4</span>"#,
        ),
        eval_row(1802, "2024-05-01 10:00:00 UTC", r#"<span class="badge badge-success">1</span>"#),
        eval_row(1801, "2024-04-30 10:00:00 UTC", r#"<span class="badge badge-success">1</span>"#),
    ]);
    let url = fake_hydra(vec![("/jobset/nixos/trunk-combined/evals".to_string(), page)]);

    zhf()
        .args(["--hydra-url", &url, "-q"])
        .args(["crawl-jobset", "nixos", "trunk-combined"])
        .assert()
        .success()
        .stdout("1802 2024-05-01 10:00:00 UTC\n");
}

#[test]
fn test_crawl_jobset_without_finished_eval_fails() {
    let page = evals_page(&[eval_row(
        1803,
        "2024-05-02 10:00:00 UTC",
        r#"<span class="badge badge-success">1</span><span class="badge badge-secondary">4</span>"#,
    )]);
    let url = fake_hydra(vec![("/jobset/nixos/trunk-combined/evals".to_string(), page)]);

    zhf()
        .args(["--hydra-url", &url, "-q", "--no-color"])
        .args(["crawl-jobset", "nixos", "trunk-combined"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(predicate::str::contains("No finished eval found"));
}

#[test]
fn test_failed_deps_writes_caches_and_purges() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write_file(
        &data.join("evalcache/1803.cache"),
        "curl.x86_64-linux 10 curl-8 x86_64-linux Dependency failed\n\
         hello.x86_64-linux 11 hello-2.12 x86_64-linux Failed\n",
    );
    write_file(&data.join("depcache/1700.cache"), "old\n");
    let url = fake_hydra(vec![(
        "/build/10".to_string(),
        build_page("nixpkgs.curl.x86_64-linux", "openssl-3.0", 901),
    )]);

    zhf()
        .args(["--data-dir", data.to_str().unwrap(), "--hydra-url", &url, "-q"])
        .args(["failed-deps", "1803", "--no-progress"])
        .assert()
        .success();

    assert_eq!(
        std::fs::read_to_string(data.join("depcache/1803.cache")).unwrap(),
        "901;nixpkgs.curl.x86_64-linux;10\n"
    );
    assert_eq!(
        std::fs::read_to_string(data.join("mostimportantcache/1803.cache")).unwrap(),
        "openssl-3.0;x86_64-linux;901\n"
    );
    assert!(!data.join("depcache/1700.cache").exists());
}

// ============================================================================
// Maintainer Fetching Tests
// ============================================================================

#[test]
fn test_fetch_maintainers_missing_cache() {
    let dir = tempdir().unwrap();
    zhf()
        .args(["--data-dir", dir.path().to_str().unwrap(), "--no-color"])
        .args(["fetch-maintainers", "404", "abc123", "1", "--skip-checkout"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("evaluation 404"))
        .stderr(predicate::str::contains("caused by"));

    assert!(!dir.path().join("maintainerscache/404.cache").exists());
}

#[cfg(unix)]
#[test]
fn test_fetch_maintainers_with_fake_nix() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write_file(
        &data.join("evalcache/1803.cache"),
        "hello.aarch64-linux 11 hello-2.12 aarch64-linux Failed\n\
         hello.x86_64-linux 12 hello-2.12 x86_64-linux Failed\n\
         orphan.x86_64-linux 13 orphan-1 x86_64-linux Dependency failed\n\
         broken.x86_64-linux 14 broken-1 x86_64-linux Timed out\n\
         fine.x86_64-linux 15 fine-1 x86_64-linux Succeeded\n",
    );
    let nix = fake_nix(dir.path());

    zhf()
        .args(["--data-dir", data.to_str().unwrap(), "-q"])
        .args(["fetch-maintainers", "1803", "abc123", "nixos"])
        .args(["--skip-checkout", "--no-progress", "--jobs", "2"])
        .arg("--nix-bin")
        .arg(&nix)
        .assert()
        .success();

    let output = std::fs::read_to_string(data.join("maintainerscache/1803.cache")).unwrap();
    assert_eq!(
        output,
        "alice hello.aarch64-linux 11 hello-2.12 aarch64-linux Failed\n\
         _ hello.aarch64-linux 11 hello-2.12 aarch64-linux Failed\n\
         alice hello.x86_64-linux 12 hello-2.12 x86_64-linux Failed\n\
         _ hello.x86_64-linux 12 hello-2.12 x86_64-linux Failed\n\
         _ orphan.x86_64-linux 13 orphan-1 x86_64-linux Dependency failed\n"
    );
}

#[cfg(unix)]
#[test]
fn test_fetch_maintainers_appends_on_rerun() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    write_file(
        &data.join("evalcache/7.cache"),
        "orphan.x86_64-linux 13 orphan-1 x86_64-linux Failed\n",
    );
    let nix = fake_nix(dir.path());

    for _ in 0..2 {
        zhf()
            .args(["--data-dir", data.to_str().unwrap(), "-q"])
            .args(["fetch-maintainers", "7", "abc123", "1", "--skip-checkout", "--no-progress"])
            .arg("--nix-bin")
            .arg(&nix)
            .assert()
            .success();
    }

    let output = std::fs::read_to_string(data.join("maintainerscache/7.cache")).unwrap();
    assert_eq!(output.lines().count(), 2);
}

// ============================================================================
// Rendering Tests
// ============================================================================

#[test]
fn test_render_maintainers() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let public = dir.path().join("public");
    write_file(
        &data.join("maintainerscache/1803.cache"),
        "alice hello.x86_64-linux 12 hello-2.12 x86_64-linux Failed\n\
         _ orphan.x86_64-linux 13 orphan-1 x86_64-linux Dependency failed\n\
         bob fine.x86_64-linux 15 fine-1 x86_64-linux Succeeded\n",
    );

    zhf()
        .args(["--data-dir", data.to_str().unwrap()])
        .args(["--public-dir", public.to_str().unwrap()])
        .args(["--hydra-url", "https://hydra.example.org/", "-q"])
        .args(["render-maintainers", "1803"])
        .assert()
        .success();

    let alice =
        std::fs::read_to_string(public.join("failed/by-maintainer/alice.html")).unwrap();
    assert!(alice.contains("https://hydra.example.org/build/12"));
    assert!(public.join("failed/by-maintainer/_.html").exists());
    assert!(!public.join("failed/by-maintainer/bob.html").exists());

    let overview = std::fs::read_to_string(public.join("failed/overview.html")).unwrap();
    assert!(overview.contains("nobody"));
    assert!(public.join("failed/all.html").exists());
}

#[test]
fn test_render_missing_cache_fails() {
    let dir = tempdir().unwrap();
    zhf()
        .args(["--data-dir", dir.path().to_str().unwrap(), "--no-color"])
        .args(["render-maintainers", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}
