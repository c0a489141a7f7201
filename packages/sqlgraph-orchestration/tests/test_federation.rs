//! End-to-end tests against real SQLite databases
//!
//! file -> merge -> select pipelines: attaching, materializing into shared
//! in-memory databases, chaining selects and noticing on-disk changes.

use sqlgraph_orchestration::{
    EngineConfig, ExecutionContext, Graph, NodeErrorKind, Registry,
};
use std::path::Path;
use tempfile::TempDir;

fn seed(path: &Path, sql: &str) {
    let mut ctx = ExecutionContext::open(path.to_string_lossy(), false).unwrap();
    ctx.write_batch(sql).unwrap();
    ctx.destroy().unwrap();
}

fn graph(dir: &TempDir) -> Graph {
    let config = EngineConfig::default().with_database_dir(dir.path());
    Graph::new(Registry::with_builtins(), config).unwrap()
}

fn read_ints(g: &mut Graph, node: &str, sql: &str) -> Vec<i64> {
    g.find_node_mut(node)
        .unwrap()
        .context_mut()
        .expect("node has an execution context")
        .read(sql, [], |r| r.get(0))
        .unwrap()
}

/// f1, f2 -> m -> s
fn federation(g: &mut Graph, query: &str) {
    g.add_node("f1", "file").unwrap();
    g.set_param("f1", "path", "a.db").unwrap();
    g.add_node("f2", "file").unwrap();
    g.set_param("f2", "path", "b.db").unwrap();
    g.add_node("m", "merge").unwrap();
    g.add_input("m", "f1", 0).unwrap();
    g.add_input("m", "f2", 0).unwrap();
    g.add_node("s", "select").unwrap();
    g.set_input("s", 0, "m", 0).unwrap();
    g.set_param("s", "query", query).unwrap();
}

#[tokio::test]
async fn test_select_materializes_into_memory_database() {
    let dir = TempDir::new().unwrap();
    let mut g = graph(&dir);
    federation(&mut g, "CREATE TABLE main.result AS SELECT 1");

    let report = g.execute().await.unwrap();
    assert!(report.is_clean(), "failed: {:?}", report.failed);
    assert_eq!(report.executed.len(), 4);
    assert!(g.nodes().all(|n| n.is_done() && n.error().is_none()));

    // merge grew exactly one slot per added input
    let inputs = g.find_node("m").unwrap().inputs().to_vec();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0].node, "f1");
    assert_eq!(inputs[1].node, "f2");

    let s = g.find_node("s").unwrap();
    let out = s.output(0);
    assert_eq!(out.dbs.len(), 1);
    assert!(out.dbs[0].in_memory);
    assert_eq!(out.dbs[0].alias, "s");
    assert_eq!(out.dbs[0].path, format!("{}-s", g.memory_namespace()));

    // m's token lists both files in slot order
    let m = g.find_node("m").unwrap().output(0);
    let aliases: Vec<_> = m.dbs.iter().map(|d| d.alias.as_str()).collect();
    assert_eq!(aliases, vec!["f1", "f2"]);

    assert_eq!(read_ints(&mut g, "s", "SELECT * FROM result"), vec![1]);

    // attaching created the files
    assert!(dir.path().join("a.db").exists());
    assert!(dir.path().join("b.db").exists());
}

#[tokio::test]
async fn test_query_edit_reruns_only_select() {
    let dir = TempDir::new().unwrap();
    let mut g = graph(&dir);
    federation(&mut g, "SELECT 1 AS x");
    g.execute().await.unwrap();

    let report = g.execute().await.unwrap();
    assert_eq!(report.memoized.len(), 4);
    // memoized select still serves its result
    assert_eq!(read_ints(&mut g, "s", "SELECT x FROM result"), vec![1]);

    g.set_param("s", "query", "SELECT 2 AS x").unwrap();
    let report = g.execute().await.unwrap();
    assert_eq!(report.executed, vec!["s"]);
    assert_eq!(read_ints(&mut g, "s", "SELECT x FROM result"), vec![2]);
}

#[tokio::test]
async fn test_join_across_files_and_chained_select() {
    let dir = TempDir::new().unwrap();
    seed(
        &dir.path().join("a.db"),
        "CREATE TABLE orders(id INTEGER, customer INTEGER, total INTEGER);
         INSERT INTO orders VALUES (1, 10, 5), (2, 11, 7), (3, 10, 9);",
    );
    seed(
        &dir.path().join("b.db"),
        "CREATE TABLE customers(id INTEGER, name TEXT);
         INSERT INTO customers VALUES (10, 'ada'), (11, 'bob');",
    );

    let mut g = graph(&dir);
    federation(
        &mut g,
        "SELECT c.name AS name, SUM(o.total) AS total
         FROM f1.orders o JOIN f2.customers c ON o.customer = c.id
         GROUP BY c.name ORDER BY c.name",
    );
    g.add_node("top", "select").unwrap();
    g.set_input("top", 0, "s", 0).unwrap();
    g.set_param("top", "query", "SELECT total FROM s.result WHERE name = 'ada'")
        .unwrap();

    let report = g.execute().await.unwrap();
    assert!(report.is_clean(), "failed: {:?}", report.failed);

    assert_eq!(
        read_ints(&mut g, "s", "SELECT total FROM result ORDER BY name"),
        vec![14, 7]
    );
    assert_eq!(read_ints(&mut g, "top", "SELECT total FROM result"), vec![14]);

    let tables = g
        .find_node_mut("s")
        .unwrap()
        .context_mut()
        .unwrap()
        .tables()
        .unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].column_names(), vec!["name", "total"]);
}

#[tokio::test]
async fn test_result_is_visible_by_name_while_node_lives() {
    let dir = TempDir::new().unwrap();
    let mut g = graph(&dir);
    federation(&mut g, "SELECT 42 AS answer");
    g.execute().await.unwrap();

    let name = g.find_node("s").unwrap().output(0).dbs[0].path.clone();
    let mut reader = ExecutionContext::open(name.clone(), true).unwrap();
    let rows: Vec<i64> = reader
        .read("SELECT answer FROM result", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, vec![42]);
    reader.destroy().unwrap();

    g.remove_node("s").unwrap();
    let mut reader = ExecutionContext::open(name, true).unwrap();
    assert!(reader.tables().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_path_and_bad_query() {
    let dir = TempDir::new().unwrap();
    let mut g = graph(&dir);
    federation(&mut g, "SELECT nope FROM f1.missing");
    g.set_param("f2", "path", "").unwrap();

    let report = g.execute().await.unwrap();
    assert_eq!(report.failed, vec!["f2", "m", "s"]);
    assert_eq!(
        g.find_node("f2").unwrap().error().unwrap().to_string(),
        "parameter 'path' is empty"
    );
    assert_eq!(
        g.find_node("m").unwrap().error().unwrap().kind(),
        NodeErrorKind::Upstream
    );

    g.set_param("f2", "path", "b.db").unwrap();
    let report = g.execute().await.unwrap();
    assert_eq!(report.failed, vec!["s"]);
    let err = g.find_node("s").unwrap().error().unwrap().to_string();
    assert!(err.starts_with("Write() failed"), "{}", err);
}

#[tokio::test]
async fn test_source_file_change_marks_node() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.db");
    seed(&path, "CREATE TABLE t(v INTEGER);");

    let mut g = graph(&dir);
    g.add_node("f1", "file").unwrap();
    g.set_param("f1", "path", "a.db").unwrap();
    g.execute().await.unwrap();
    assert!(g.detect_source_changes().is_empty());

    std::thread::sleep(std::time::Duration::from_millis(20));
    seed(&path, "INSERT INTO t VALUES (1);");

    assert_eq!(g.detect_source_changes(), vec!["f1"]);
    assert!(g.find_node("f1").unwrap().is_changed());
    let report = g.execute().await.unwrap();
    assert_eq!(report.executed, vec!["f1"]);
}
