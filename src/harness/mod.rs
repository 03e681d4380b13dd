//! Replay harness: per-table rowset digests chained into a linear hash
//! DAG whose root proves bit-exact reproducibility of one hour.
//!
//! The table ordering is part of the protocol; it is a fixed list, never
//! discovered reflectively.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use tracing::debug;
use uuid::Uuid;

use crate::canonical::{canonical_serialize, normalize_timestamp, stable_hash};
use crate::error::{CoreError, CoreResult};
use crate::store::{Database, Row, Value};
use crate::tokens;

/// Stored manifest surface for one hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayManifestState {
    pub run_seed_hash: String,
    pub replay_root_hash: String,
    pub authoritative_row_count: i64,
}

/// Snapshot boundary anchoring the hash DAG.
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySnapshotBoundary {
    pub run_id: Uuid,
    pub account_id: i64,
    pub run_mode: String,
    pub origin_hour_ts_utc: DateTime<Utc>,
    pub run_seed_hash: String,
    pub context_hash: String,
    pub run_context_replay_root_hash: String,
    pub prior_risk_state_hash: Option<String>,
    pub prior_portfolio_state_hash: Option<String>,
    pub prior_ledger_hash: Option<String>,
    pub manifest: Option<ReplayManifestState>,
}

/// One table's canonical rowset digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayTableDigest {
    pub table_name: String,
    pub row_count: i64,
    pub rowset_digest: String,
}

/// One node of the linear hash DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayHashNode {
    pub node_name: String,
    pub node_hash: String,
    pub parent_hashes: Vec<String>,
}

/// Recomputed DAG output.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayDagResult {
    pub boundary_hash: String,
    pub root_hash: String,
    pub authoritative_row_count: i64,
    pub table_digests: Vec<ReplayTableDigest>,
    pub hash_nodes: Vec<ReplayHashNode>,
}

/// Classified parity failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayFailure {
    pub failure_code: String,
    pub severity: String,
    pub scope: String,
    pub detail: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Manifest parity outcome for one hour.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayComparisonReport {
    pub replay_parity: bool,
    pub mismatch_count: usize,
    pub failures: Vec<ReplayFailure>,
    pub recomputed_root_hash: String,
    pub manifest_root_hash: Option<String>,
    pub recomputed_authoritative_row_count: i64,
    pub manifest_authoritative_row_count: Option<i64>,
}

/// One replayable target key.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayTarget {
    pub run_id: Uuid,
    pub account_id: i64,
    pub run_mode: String,
    pub origin_hour_ts_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayWindowItem {
    pub target: ReplayTarget,
    pub report: ReplayComparisonReport,
}

/// Window parity summary.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayWindowReport {
    pub replay_parity: bool,
    pub total_targets: usize,
    pub passed_targets: usize,
    pub failed_targets: usize,
    pub items: Vec<ReplayWindowItem>,
}

struct ReplayTableSpec {
    table_name: &'static str,
    key_columns: &'static [&'static str],
    hash_column: &'static str,
    sql: &'static str,
}

/// Fixed deterministic table order; run_context is prepended separately.
const REPLAY_TABLE_SPECS: &[ReplayTableSpec] = &[
    ReplayTableSpec {
        table_name: "model_prediction",
        key_columns: &["asset_id", "horizon", "model_version_id", "hour_ts_utc"],
        hash_column: "row_hash",
        sql: "SELECT asset_id, horizon, model_version_id, hour_ts_utc, row_hash
              FROM model_prediction
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND hour_ts_utc = :origin_hour_ts_utc
              ORDER BY asset_id ASC, horizon ASC, model_version_id ASC, row_hash ASC",
    },
    ReplayTableSpec {
        table_name: "regime_output",
        key_columns: &["asset_id", "model_version_id", "hour_ts_utc"],
        hash_column: "row_hash",
        sql: "SELECT asset_id, model_version_id, hour_ts_utc, row_hash
              FROM regime_output
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND hour_ts_utc = :origin_hour_ts_utc
              ORDER BY asset_id ASC, model_version_id ASC, row_hash ASC",
    },
    ReplayTableSpec {
        table_name: "risk_hourly_state",
        key_columns: &["hour_ts_utc"],
        hash_column: "row_hash",
        sql: "SELECT hour_ts_utc, row_hash
              FROM risk_hourly_state
              WHERE source_run_id = :run_id
                AND run_mode = :run_mode
                AND account_id = :account_id
                AND hour_ts_utc = :origin_hour_ts_utc
              ORDER BY hour_ts_utc ASC",
    },
    ReplayTableSpec {
        table_name: "portfolio_hourly_state",
        key_columns: &["hour_ts_utc"],
        hash_column: "row_hash",
        sql: "SELECT hour_ts_utc, row_hash
              FROM portfolio_hourly_state
              WHERE source_run_id = :run_id
                AND run_mode = :run_mode
                AND account_id = :account_id
                AND hour_ts_utc = :origin_hour_ts_utc
              ORDER BY hour_ts_utc ASC",
    },
    ReplayTableSpec {
        table_name: "cluster_exposure_hourly_state",
        key_columns: &["cluster_id", "hour_ts_utc"],
        hash_column: "row_hash",
        sql: "SELECT cluster_id, hour_ts_utc, row_hash
              FROM cluster_exposure_hourly_state
              WHERE source_run_id = :run_id
                AND run_mode = :run_mode
                AND account_id = :account_id
                AND hour_ts_utc = :origin_hour_ts_utc
              ORDER BY cluster_id ASC, row_hash ASC",
    },
    ReplayTableSpec {
        table_name: "trade_signal",
        key_columns: &["signal_id"],
        hash_column: "row_hash",
        sql: "SELECT signal_id, row_hash
              FROM trade_signal
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND hour_ts_utc = :origin_hour_ts_utc
              ORDER BY signal_id ASC",
    },
    ReplayTableSpec {
        table_name: "order_request",
        key_columns: &["order_id"],
        hash_column: "row_hash",
        sql: "SELECT order_id, row_hash
              FROM order_request
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND origin_hour_ts_utc = :origin_hour_ts_utc
              ORDER BY order_id ASC",
    },
    ReplayTableSpec {
        table_name: "order_fill",
        key_columns: &["fill_id"],
        hash_column: "row_hash",
        sql: "SELECT fill_id, row_hash
              FROM order_fill
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND origin_hour_ts_utc = :origin_hour_ts_utc
              ORDER BY fill_id ASC",
    },
    ReplayTableSpec {
        table_name: "position_lot",
        key_columns: &["lot_id"],
        hash_column: "row_hash",
        sql: "SELECT lot_id, row_hash
              FROM position_lot
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND origin_hour_ts_utc = :origin_hour_ts_utc
              ORDER BY lot_id ASC",
    },
    ReplayTableSpec {
        table_name: "executed_trade",
        key_columns: &["trade_id"],
        hash_column: "row_hash",
        sql: "SELECT trade_id, row_hash
              FROM executed_trade
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND origin_hour_ts_utc = :origin_hour_ts_utc
              ORDER BY trade_id ASC",
    },
    ReplayTableSpec {
        table_name: "cash_ledger",
        key_columns: &["ledger_seq"],
        hash_column: "row_hash",
        sql: "SELECT ledger_seq, row_hash
              FROM cash_ledger
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND origin_hour_ts_utc = :origin_hour_ts_utc
              ORDER BY ledger_seq ASC",
    },
    ReplayTableSpec {
        table_name: "risk_event",
        key_columns: &["risk_event_id"],
        hash_column: "row_hash",
        sql: "SELECT risk_event_id, row_hash
              FROM risk_event
              WHERE run_id = :run_id
                AND account_id = :account_id
                AND run_mode = :run_mode
                AND origin_hour_ts_utc = :origin_hour_ts_utc
              ORDER BY risk_event_id ASC",
    },
];

fn classification(failure_code: &str) -> (&'static str, &'static str) {
    match failure_code {
        "MANIFEST_MISSING" => ("CRITICAL", "replay_manifest"),
        "RUN_SEED_MISMATCH" => ("HIGH", "replay_manifest"),
        "ROOT_HASH_MISMATCH" => ("CRITICAL", "replay_manifest"),
        "ROW_COUNT_MISMATCH" => ("HIGH", "replay_manifest"),
        "RUN_CONTEXT_ROOT_MISMATCH" => ("HIGH", "run_context"),
        _ => ("MEDIUM", "unknown"),
    }
}

/// Map a replay mismatch into its deterministic classification.
pub fn classify_replay_failure(
    failure_code: &str,
    detail: &str,
    expected: Option<String>,
    actual: Option<String>,
) -> ReplayFailure {
    let (severity, scope) = classification(failure_code);
    ReplayFailure {
        failure_code: failure_code.to_string(),
        severity: severity.to_string(),
        scope: scope.to_string(),
        detail: detail.to_string(),
        expected,
        actual,
    }
}

/// Load the replay snapshot boundary and associated manifest state.
pub fn load_snapshot_boundary<D: Database>(
    db: &D,
    run_id: Uuid,
    account_id: i64,
    origin_hour_ts_utc: DateTime<Utc>,
) -> CoreResult<ReplaySnapshotBoundary> {
    let run_context = db
        .fetch_one(
            "SELECT run_id, account_id, run_mode, origin_hour_ts_utc,
                    run_seed_hash, context_hash, replay_root_hash
             FROM run_context
             WHERE run_id = :run_id
               AND account_id = :account_id
               AND origin_hour_ts_utc = :origin_hour_ts_utc",
            &[
                ("run_id", Value::from(run_id)),
                ("account_id", Value::from(account_id)),
                ("origin_hour_ts_utc", Value::from(origin_hour_ts_utc)),
            ],
        )?
        .ok_or_else(|| {
            CoreError::InputMissing("run_context not found for replay boundary key".into())
        })?;

    let run_mode = run_context.get_str("run_mode")?;

    let manifest_row = db.fetch_one(
        "SELECT run_seed_hash, replay_root_hash, authoritative_row_count
         FROM replay_manifest
         WHERE run_id = :run_id
           AND account_id = :account_id
           AND origin_hour_ts_utc = :origin_hour_ts_utc",
        &[
            ("run_id", Value::from(run_id)),
            ("account_id", Value::from(account_id)),
            ("origin_hour_ts_utc", Value::from(origin_hour_ts_utc)),
        ],
    )?;
    let manifest = manifest_row
        .map(|row| {
            Ok::<_, CoreError>(ReplayManifestState {
                run_seed_hash: row.get_str("run_seed_hash")?,
                replay_root_hash: row.get_str("replay_root_hash")?,
                authoritative_row_count: row.get_i64("authoritative_row_count")?,
            })
        })
        .transpose()?;

    let prior_params = [
        ("run_mode", Value::from(run_mode.as_str())),
        ("account_id", Value::from(account_id)),
        ("origin_hour_ts_utc", Value::from(origin_hour_ts_utc)),
    ];
    let prior_risk = db.fetch_one(
        "SELECT row_hash
         FROM risk_hourly_state
         WHERE run_mode = :run_mode
           AND account_id = :account_id
           AND hour_ts_utc < :origin_hour_ts_utc
         ORDER BY hour_ts_utc DESC
         LIMIT 1",
        &prior_params,
    )?;
    let prior_portfolio = db.fetch_one(
        "SELECT row_hash
         FROM portfolio_hourly_state
         WHERE run_mode = :run_mode
           AND account_id = :account_id
           AND hour_ts_utc < :origin_hour_ts_utc
         ORDER BY hour_ts_utc DESC
         LIMIT 1",
        &prior_params,
    )?;
    let prior_ledger = db.fetch_one(
        "SELECT ledger_hash
         FROM cash_ledger
         WHERE run_mode = :run_mode
           AND account_id = :account_id
           AND event_ts_utc < :origin_hour_ts_utc
         ORDER BY event_ts_utc DESC, ledger_seq DESC
         LIMIT 1",
        &prior_params,
    )?;

    Ok(ReplaySnapshotBoundary {
        run_id: run_context.get_uuid("run_id")?,
        account_id: run_context.get_i64("account_id")?,
        run_mode,
        origin_hour_ts_utc: run_context.get_timestamp("origin_hour_ts_utc")?,
        run_seed_hash: run_context.get_str("run_seed_hash")?,
        context_hash: run_context.get_str("context_hash")?,
        run_context_replay_root_hash: run_context.get_str("replay_root_hash")?,
        prior_risk_state_hash: prior_risk.map(|row| row.get_str("row_hash")).transpose()?,
        prior_portfolio_state_hash: prior_portfolio
            .map(|row| row.get_str("row_hash"))
            .transpose()?,
        prior_ledger_hash: prior_ledger
            .map(|row| row.get_str("ledger_hash"))
            .transpose()?,
        manifest,
    })
}

/// Recompute the deterministic hash DAG and canonical replay root.
pub fn recompute_hash_dag<D: Database>(
    db: &D,
    boundary: &ReplaySnapshotBoundary,
) -> CoreResult<ReplayDagResult> {
    let boundary_hash = stable_hash(tokens![
        "phase_2_boundary_v1",
        &boundary.run_seed_hash,
        &boundary.context_hash,
        normalize_timestamp(boundary.origin_hour_ts_utc),
        boundary.prior_risk_state_hash.clone().unwrap_or_default(),
        boundary
            .prior_portfolio_state_hash
            .clone()
            .unwrap_or_default(),
        boundary.prior_ledger_hash.clone().unwrap_or_default(),
    ]);

    let params = [
        ("run_id", Value::from(boundary.run_id)),
        ("account_id", Value::from(boundary.account_id)),
        ("run_mode", Value::from(boundary.run_mode.as_str())),
        (
            "origin_hour_ts_utc",
            Value::from(boundary.origin_hour_ts_utc),
        ),
    ];

    let mut digests: Vec<ReplayTableDigest> = Vec::new();
    let mut nodes: Vec<ReplayHashNode> = vec![ReplayHashNode {
        node_name: "boundary".to_string(),
        node_hash: boundary_hash.clone(),
        parent_hashes: Vec::new(),
    }];

    // run_context digests its own identity row through context_hash.
    let run_context_row = Row::new(vec![
        ("run_id".to_string(), Value::from(boundary.run_id)),
        ("account_id".to_string(), Value::from(boundary.account_id)),
        (
            "run_mode".to_string(),
            Value::from(boundary.run_mode.as_str()),
        ),
        (
            "origin_hour_ts_utc".to_string(),
            Value::from(boundary.origin_hour_ts_utc),
        ),
        (
            "context_hash".to_string(),
            Value::from(boundary.context_hash.as_str()),
        ),
    ]);
    let run_context_digest = compute_table_digest(
        "run_context",
        &["run_id", "account_id", "run_mode", "origin_hour_ts_utc"],
        "context_hash",
        &[run_context_row],
        &boundary_hash,
    )?;
    let mut prior_node_hash = stable_hash(tokens![
        "phase_2_table_node_v1",
        &boundary_hash,
        run_context_digest.table_name.as_str(),
        run_context_digest.rowset_digest.as_str(),
        run_context_digest.row_count.to_string(),
    ]);
    nodes.push(ReplayHashNode {
        node_name: run_context_digest.table_name.clone(),
        node_hash: prior_node_hash.clone(),
        parent_hashes: vec![boundary_hash.clone()],
    });
    digests.push(run_context_digest);

    for spec in REPLAY_TABLE_SPECS {
        let rows = db.fetch_all(spec.sql, &params)?;
        let digest = compute_table_digest(
            spec.table_name,
            spec.key_columns,
            spec.hash_column,
            &rows,
            &boundary_hash,
        )?;
        let node_hash = stable_hash(tokens![
            "phase_2_table_node_v1",
            prior_node_hash.as_str(),
            digest.table_name.as_str(),
            digest.rowset_digest.as_str(),
            digest.row_count.to_string(),
        ]);
        nodes.push(ReplayHashNode {
            node_name: digest.table_name.clone(),
            node_hash: node_hash.clone(),
            parent_hashes: vec![prior_node_hash.clone()],
        });
        digests.push(digest);
        prior_node_hash = node_hash;
    }

    let mut root_tokens = tokens!["phase_2_replay_root_v1", boundary_hash.as_str()];
    for node in nodes.iter().skip(1) {
        root_tokens.push(crate::canonical::Token::Str(format!(
            "{}:{}",
            node.node_name, node.node_hash
        )));
    }
    let root_hash = stable_hash(root_tokens);
    let authoritative_row_count: i64 = digests.iter().map(|digest| digest.row_count).sum();

    debug!(
        root_hash = %root_hash,
        rows = authoritative_row_count,
        "recomputed replay hash DAG"
    );

    Ok(ReplayDagResult {
        boundary_hash,
        root_hash,
        authoritative_row_count,
        table_digests: digests,
        hash_nodes: nodes,
    })
}

fn json_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(v) => json!(v),
        Value::Real(v) => json!(v),
        Value::Text(v) => json!(v),
    }
}

fn sort_token(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Integer(v)) => v.to_string(),
        Some(Value::Real(v)) => v.to_string(),
        Some(Value::Text(v)) => v.clone(),
    }
}

fn compute_table_digest(
    table_name: &str,
    key_columns: &[&str],
    hash_column: &str,
    rows: &[Row],
    boundary_hash: &str,
) -> CoreResult<ReplayTableDigest> {
    let mut sorted: Vec<&Row> = rows.iter().collect();
    sorted.sort_by_key(|row| {
        key_columns
            .iter()
            .map(|column| sort_token(row.get(column)))
            .collect::<Vec<String>>()
    });

    let mut canonical_rows = Vec::with_capacity(sorted.len());
    for row in &sorted {
        let mut keys = serde_json::Map::new();
        for column in key_columns {
            keys.insert(
                (*column).to_string(),
                row.get(column).map(json_value).unwrap_or(JsonValue::Null),
            );
        }
        canonical_rows.push(json!({
            "keys": keys,
            "hash": row.get(hash_column).map(json_value).unwrap_or(JsonValue::Null),
        }));
    }
    let serialized = canonical_serialize(&json!({
        "table": table_name,
        "rows": canonical_rows,
    }));
    let row_count = canonical_rows.len() as i64;
    let rowset_digest = stable_hash(tokens![
        "phase_2_table_digest_v1",
        boundary_hash,
        table_name,
        row_count.to_string(),
        serialized,
    ]);
    Ok(ReplayTableDigest {
        table_name: table_name.to_string(),
        row_count,
        rowset_digest,
    })
}

/// Compare recomputed DAG outputs against the stored manifest surface.
pub fn compare_replay_with_manifest(
    boundary: &ReplaySnapshotBoundary,
    recomputed: &ReplayDagResult,
) -> ReplayComparisonReport {
    let mut failures = Vec::new();
    let (manifest_root_hash, manifest_row_count) = match &boundary.manifest {
        None => {
            failures.push(classify_replay_failure(
                "MANIFEST_MISSING",
                "No replay_manifest row found for replay key.",
                None,
                None,
            ));
            (None, None)
        }
        Some(manifest) => {
            if manifest.run_seed_hash != boundary.run_seed_hash {
                failures.push(classify_replay_failure(
                    "RUN_SEED_MISMATCH",
                    "run_seed_hash in replay_manifest does not match run_context.",
                    Some(boundary.run_seed_hash.clone()),
                    Some(manifest.run_seed_hash.clone()),
                ));
            }
            if manifest.replay_root_hash != recomputed.root_hash {
                failures.push(classify_replay_failure(
                    "ROOT_HASH_MISMATCH",
                    "replay_root_hash in replay_manifest does not match recomputed DAG root.",
                    Some(recomputed.root_hash.clone()),
                    Some(manifest.replay_root_hash.clone()),
                ));
            }
            if manifest.authoritative_row_count != recomputed.authoritative_row_count {
                failures.push(classify_replay_failure(
                    "ROW_COUNT_MISMATCH",
                    "authoritative_row_count does not match recomputed row surface count.",
                    Some(recomputed.authoritative_row_count.to_string()),
                    Some(manifest.authoritative_row_count.to_string()),
                ));
            }
            (
                Some(manifest.replay_root_hash.clone()),
                Some(manifest.authoritative_row_count),
            )
        }
    };

    if boundary.run_context_replay_root_hash != recomputed.root_hash {
        failures.push(classify_replay_failure(
            "RUN_CONTEXT_ROOT_MISMATCH",
            "run_context.replay_root_hash does not match recomputed DAG root.",
            Some(recomputed.root_hash.clone()),
            Some(boundary.run_context_replay_root_hash.clone()),
        ));
    }

    ReplayComparisonReport {
        replay_parity: failures.is_empty(),
        mismatch_count: failures.len(),
        failures,
        recomputed_root_hash: recomputed.root_hash.clone(),
        manifest_root_hash,
        recomputed_authoritative_row_count: recomputed.authoritative_row_count,
        manifest_authoritative_row_count: manifest_row_count,
    }
}

/// End-to-end deterministic replay parity check for one hour.
pub fn replay_manifest_parity<D: Database>(
    db: &D,
    run_id: Uuid,
    account_id: i64,
    origin_hour_ts_utc: DateTime<Utc>,
) -> CoreResult<ReplayComparisonReport> {
    let boundary = load_snapshot_boundary(db, run_id, account_id, origin_hour_ts_utc)?;
    let recomputed = recompute_hash_dag(db, &boundary)?;
    Ok(compare_replay_with_manifest(&boundary, &recomputed))
}

/// List deterministic replay targets for an account/mode/hour window.
pub fn list_replay_targets<D: Database>(
    db: &D,
    account_id: i64,
    run_mode: &str,
    start_hour_ts_utc: DateTime<Utc>,
    end_hour_ts_utc: DateTime<Utc>,
    max_targets: Option<usize>,
) -> CoreResult<Vec<ReplayTarget>> {
    if end_hour_ts_utc < start_hour_ts_utc {
        return Err(CoreError::InvariantViolation(
            "end_hour_ts_utc must be >= start_hour_ts_utc".into(),
        ));
    }

    let rows = db.fetch_all(
        "SELECT run_id, account_id, run_mode, origin_hour_ts_utc
         FROM run_context
         WHERE account_id = :account_id
           AND run_mode = :run_mode
           AND origin_hour_ts_utc >= :start_hour_ts_utc
           AND origin_hour_ts_utc <= :end_hour_ts_utc
         ORDER BY origin_hour_ts_utc ASC, run_id ASC",
        &[
            ("account_id", Value::from(account_id)),
            ("run_mode", Value::from(run_mode)),
            ("start_hour_ts_utc", Value::from(start_hour_ts_utc)),
            ("end_hour_ts_utc", Value::from(end_hour_ts_utc)),
        ],
    )?;
    if rows.is_empty() {
        return Err(CoreError::InputMissing(
            "no run_context rows found for replay target window".into(),
        ));
    }

    let mut targets = Vec::with_capacity(rows.len());
    for row in &rows {
        targets.push(ReplayTarget {
            run_id: row.get_uuid("run_id")?,
            account_id: row.get_i64("account_id")?,
            run_mode: row.get_str("run_mode")?,
            origin_hour_ts_utc: row.get_timestamp("origin_hour_ts_utc")?,
        });
    }
    match max_targets {
        None => Ok(targets),
        Some(0) => Err(CoreError::InvariantViolation(
            "max_targets must be > 0 when provided".into(),
        )),
        Some(limit) => {
            targets.truncate(limit);
            Ok(targets)
        }
    }
}

/// Run parity checks over a deterministic replay target window.
pub fn replay_manifest_window_parity<D: Database>(
    db: &D,
    account_id: i64,
    run_mode: &str,
    start_hour_ts_utc: DateTime<Utc>,
    end_hour_ts_utc: DateTime<Utc>,
    max_targets: Option<usize>,
) -> CoreResult<ReplayWindowReport> {
    let targets = list_replay_targets(
        db,
        account_id,
        run_mode,
        start_hour_ts_utc,
        end_hour_ts_utc,
        max_targets,
    )?;

    let mut items = Vec::with_capacity(targets.len());
    for target in targets {
        let report =
            replay_manifest_parity(db, target.run_id, target.account_id, target.origin_hour_ts_utc)?;
        items.push(ReplayWindowItem { target, report });
    }
    let total_targets = items.len();
    let failed_targets = items
        .iter()
        .filter(|item| !item.report.replay_parity)
        .count();

    Ok(ReplayWindowReport {
        replay_parity: failed_targets == 0,
        total_targets,
        passed_targets: total_targets - failed_targets,
        failed_targets,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_covers_known_codes() {
        let failure = classify_replay_failure("MANIFEST_MISSING", "missing", None, None);
        assert_eq!(failure.severity, "CRITICAL");
        assert_eq!(failure.scope, "replay_manifest");

        let failure = classify_replay_failure("RUN_CONTEXT_ROOT_MISMATCH", "drift", None, None);
        assert_eq!(failure.severity, "HIGH");
        assert_eq!(failure.scope, "run_context");

        let failure = classify_replay_failure("SOMETHING_ELSE", "odd", None, None);
        assert_eq!(failure.severity, "MEDIUM");
        assert_eq!(failure.scope, "unknown");
    }

    #[test]
    fn table_digest_is_order_insensitive_over_fetched_rows() {
        let row_a = Row::new(vec![
            ("signal_id".to_string(), Value::from("aaa")),
            ("row_hash".to_string(), Value::from("h1")),
        ]);
        let row_b = Row::new(vec![
            ("signal_id".to_string(), Value::from("bbb")),
            ("row_hash".to_string(), Value::from("h2")),
        ]);
        let boundary = "boundary";
        let forward = compute_table_digest(
            "trade_signal",
            &["signal_id"],
            "row_hash",
            &[row_a.clone(), row_b.clone()],
            boundary,
        )
        .unwrap();
        let reversed = compute_table_digest(
            "trade_signal",
            &["signal_id"],
            "row_hash",
            &[row_b, row_a],
            boundary,
        )
        .unwrap();
        assert_eq!(forward.rowset_digest, reversed.rowset_digest);
        assert_eq!(forward.row_count, 2);
    }

    #[test]
    fn digest_changes_with_row_hash() {
        let row = |hash: &str| {
            Row::new(vec![
                ("signal_id".to_string(), Value::from("aaa")),
                ("row_hash".to_string(), Value::from(hash)),
            ])
        };
        let one = compute_table_digest("trade_signal", &["signal_id"], "row_hash", &[row("h1")], "b")
            .unwrap();
        let two = compute_table_digest("trade_signal", &["signal_id"], "row_hash", &[row("h2")], "b")
            .unwrap();
        assert_ne!(one.rowset_digest, two.rowset_digest);
    }
}
