//! End-to-end lookup/store scenarios against real files

use objstash::engine::{CacheInputs, Engine, EngineOptions, HitSource, LookupOutcome, StoreOutcome};
use objstash::hash::{hash_bytes, HashAlgorithm};
use objstash::manifest::{ContentFingerprinter, Manifest};
use objstash::storage::secondary::StorageSpec;
use objstash::storage::CacheKey;
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::time::UNIX_EPOCH;
use tempfile::TempDir;

struct Project {
    tmp: TempDir,
}

impl Project {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
        }
    }

    fn header(&self, name: &str, body: &str) -> String {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn cache(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }
}

fn inputs(engine: &Engine) -> CacheInputs {
    engine
        .inputs()
        .compiler("gcc 14.1")
        .args(["-O2", "-Iinclude", "-c"])
        .source(&hash_bytes(HashAlgorithm::Xxh3, b"#include \"config.h\"\nint main() {}"))
}

/// Look up; on a miss, "compile" to `output` and store with `headers`
fn build(engine: &mut Engine, headers: &[&str], output: &[u8]) -> LookupOutcome {
    let ins = inputs(engine);
    let outcome = engine.lookup(&ins);
    if let LookupOutcome::Miss(token) = &outcome {
        let fps = ContentFingerprinter::new(HashAlgorithm::Xxh3)
            .record_all(headers.iter().copied())
            .expect("headers readable");
        engine.store(token.clone(), output, fps).unwrap();
    }
    outcome
}

fn hit_bytes(outcome: LookupOutcome) -> Vec<u8> {
    match outcome {
        LookupOutcome::Hit(hit) => hit.bytes,
        LookupOutcome::Miss(_) => panic!("expected a hit"),
    }
}

#[test]
fn header_edits_are_detected() {
    let p = Project::new();
    let mut engine = Engine::new(EngineOptions::new(p.cache("cache"))).unwrap();
    let config_h = p.header("config.h", "#define LEVEL 1\n");

    assert!(!build(&mut engine, &[&config_h], b"obj-level-1").is_hit());
    assert_eq!(hit_bytes(build(&mut engine, &[&config_h], b"unused")), b"obj-level-1");

    // Same size, different content
    p.header("config.h", "#define LEVEL 2\n");
    assert!(!build(&mut engine, &[&config_h], b"obj-level-2").is_hit());
    assert_eq!(hit_bytes(build(&mut engine, &[&config_h], b"unused")), b"obj-level-2");

    // Reverting selects the older entry again
    p.header("config.h", "#define LEVEL 1\n");
    assert_eq!(hit_bytes(build(&mut engine, &[&config_h], b"unused")), b"obj-level-1");

    // Deleting a recorded header can never hit
    std::fs::remove_file(&config_h).unwrap();
    let outcome = engine.lookup(&inputs(&engine));
    assert!(!outcome.is_hit());
}

#[test]
fn oldest_entry_is_dropped_at_capacity() {
    let p = Project::new();
    let mut opts = EngineOptions::new(p.cache("cache"));
    opts.max_manifest_entries = 2;
    let mut engine = Engine::new(opts).unwrap();
    let h = p.header("v.h", "0");

    for v in ["1", "2", "3"] {
        p.header("v.h", v);
        build(&mut engine, &[&h], format!("obj{v}").as_bytes());
    }

    p.header("v.h", "1");
    assert!(!engine.lookup(&inputs(&engine)).is_hit());
    p.header("v.h", "3");
    assert_eq!(hit_bytes(engine.lookup(&inputs(&engine))), b"obj3");

    let manifest_path = engine
        .local()
        .path_for(&CacheKey::manifest(inputs(&engine).class_digest()));
    let manifest = Manifest::from_bytes(&std::fs::read(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.len(), 2);
}

#[test]
fn shared_directory_remote_serves_other_machines() {
    let p = Project::new();
    let remote = p.cache("remote");
    std::fs::create_dir_all(&remote).unwrap();
    let remote_url = url::Url::from_directory_path(&remote).unwrap();
    let spec: StorageSpec = format!("{remote_url}|namespace=team").parse().unwrap();
    let h = p.header("a.h", "struct a;");

    let mut first = EngineOptions::new(p.cache("machine-a"));
    first.secondary = vec![spec.clone()];
    let mut a = Engine::new(first).unwrap();
    build(&mut a, &[&h], b"built on a");
    assert!(remote.join("team").is_dir());

    let mut second = EngineOptions::new(p.cache("machine-b"));
    second.secondary = vec![spec];
    let mut b = Engine::new(second).unwrap();
    match b.lookup(&inputs(&b)) {
        LookupOutcome::Hit(hit) => {
            assert_eq!(hit.bytes, b"built on a");
            assert_eq!(hit.source, HitSource::Secondary);
        }
        LookupOutcome::Miss(_) => panic!("expected remote hit"),
    }
    match b.lookup(&inputs(&b)) {
        LookupOutcome::Hit(hit) => assert_eq!(hit.source, HitSource::Local),
        LookupOutcome::Miss(_) => panic!("expected mirrored local hit"),
    }
}

#[test]
fn unreachable_remote_only_costs_hits() {
    let p = Project::new();
    let mut opts = EngineOptions::new(p.cache("cache"));
    opts.secondary = vec!["http://127.0.0.1:9|connect-timeout=50|operation-timeout=200"
        .parse()
        .unwrap()];
    let mut engine = Engine::new(opts).unwrap();
    let h = p.header("a.h", "x");

    assert!(!build(&mut engine, &[&h], b"obj").is_hit());
    assert_eq!(hit_bytes(build(&mut engine, &[&h], b"unused")), b"obj");
}

#[test]
fn damaged_manifest_is_a_miss_and_gets_rewritten() {
    let p = Project::new();
    let mut engine = Engine::new(EngineOptions::new(p.cache("cache"))).unwrap();
    let h = p.header("a.h", "x");
    build(&mut engine, &[&h], b"obj");

    let manifest_path = engine
        .local()
        .path_for(&CacheKey::manifest(inputs(&engine).class_digest()));
    let mut bytes = std::fs::read(&manifest_path).unwrap();
    bytes.truncate(bytes.len() - 3);
    std::fs::write(&manifest_path, bytes).unwrap();

    assert!(!build(&mut engine, &[&h], b"obj").is_hit());
    assert_eq!(hit_bytes(build(&mut engine, &[&h], b"unused")), b"obj");
}

#[test]
fn concurrent_writers_do_not_lose_entries() {
    let p = Project::new();
    let root = p.cache("cache");
    let headers: Vec<String> = (0..8)
        .map(|i| p.header(&format!("h{i}.h"), &format!("int v{i};")))
        .collect();

    // Every writer looks up before any stores, so all of them miss.
    let barrier = Barrier::new(headers.len());
    std::thread::scope(|s| {
        for header in &headers {
            let root = root.clone();
            let barrier = &barrier;
            s.spawn(move || {
                let mut engine = Engine::new(EngineOptions::new(&root)).unwrap();
                let outcome = engine.lookup(&inputs(&engine));
                barrier.wait();
                let LookupOutcome::Miss(token) = outcome else {
                    panic!("empty cache should miss");
                };
                let fps = ContentFingerprinter::new(HashAlgorithm::Xxh3)
                    .record_all([header.as_str()])
                    .unwrap();
                let stored = engine.store(token, header.as_bytes(), fps).unwrap();
                assert!(matches!(stored, StoreOutcome::Stored(_)));
            });
        }
    });

    let engine = Engine::new(EngineOptions::new(&root)).unwrap();
    let manifest_path = engine
        .local()
        .path_for(&CacheKey::manifest(inputs(&engine).class_digest()));
    let manifest = Manifest::from_bytes(&std::fs::read(manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.len(), headers.len());
}

#[test]
fn headers_newer_than_compile_start_are_not_recorded() {
    let p = Project::new();
    let h = p.header("fresh.h", "int fresh;");
    let fps = ContentFingerprinter::new(HashAlgorithm::Xxh3)
        .reject_newer_than(UNIX_EPOCH)
        .record_all([h.as_str()]);
    assert!(fps.is_none());
}

#[test]
fn sha256_caches_are_separate() {
    let p = Project::new();
    let root = p.cache("cache");
    let h = p.header("a.h", "x");

    let mut xxh = Engine::new(EngineOptions::new(&root)).unwrap();
    build(&mut xxh, &[&h], b"obj");

    let mut opts = EngineOptions::new(&root);
    opts.algorithm = HashAlgorithm::Sha256;
    let mut sha = Engine::new(opts).unwrap();
    assert_eq!(inputs(&sha).algorithm(), HashAlgorithm::Sha256);
    assert!(!sha.lookup(&inputs(&sha)).is_hit());
    assert!(Path::new(&root).is_dir());
}
