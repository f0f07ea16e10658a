use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension, Row};

use certflow_core::error::{CertflowError, Result};
use certflow_core::traits::{AccessRepository, CertificateRepository, WorkflowOutputRepository};
use certflow_core::types::{Access, Certificate, CertificateSource, WorkflowOutput};

use crate::store::{db_err, parse_opt_ts, parse_ts, ts, SqliteStore};

const OUTPUT_COLUMNS: &str =
    "id, workflow_id, run_id, node_id, node_config, outputs, succeeded, skipped, created_at";

fn read_output(row: &Row<'_>) -> rusqlite::Result<(WorkflowOutput, String, String)> {
    let node_config: String = row.get(4)?;
    let outputs: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    Ok((
        WorkflowOutput {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            run_id: row.get(2)?,
            node_id: row.get(3)?,
            node_config: serde_json::Value::Null,
            outputs: vec![],
            succeeded: row.get(6)?,
            skipped: row.get(7)?,
            created_at: parse_ts(&created_at),
        },
        node_config,
        outputs,
    ))
}

fn finish_output(
    (mut output, node_config, outputs): (WorkflowOutput, String, String),
) -> Result<WorkflowOutput> {
    output.node_config = serde_json::from_str(&node_config)?;
    output.outputs = serde_json::from_str(&outputs)?;
    Ok(output)
}

fn insert_output(conn: &Connection, output: &WorkflowOutput) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO workflow_outputs ({OUTPUT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            output.id,
            output.workflow_id,
            output.run_id,
            output.node_id,
            serde_json::to_string(&output.node_config)?,
            serde_json::to_string(&output.outputs)?,
            output.succeeded,
            output.skipped,
            ts(&output.created_at)
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn insert_certificate(conn: &Connection, c: &Certificate) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO certificates ({CERT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
             ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        ),
        params![
            c.id,
            c.source.as_str(),
            serde_json::to_string(&c.subject_alt_names)?,
            c.certificate,
            c.issuer_certificate,
            c.private_key,
            c.key_algorithm,
            c.serial_number,
            c.issuer_org,
            c.valid_from.as_ref().map(ts),
            c.valid_to.as_ref().map(ts),
            c.acme_account_url,
            c.acme_certificate_url,
            c.renewed_from_id,
            c.workflow_id,
            c.workflow_run_id,
            c.workflow_node_id,
            ts(&c.created_at)
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

impl WorkflowOutputRepository for SqliteStore {
    fn get(&self, run_id: &str, node_id: &str) -> BoxFuture<'_, Result<Option<WorkflowOutput>>> {
        let (run_id, node_id) = (run_id.to_string(), node_id.to_string());
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {OUTPUT_COLUMNS} FROM workflow_outputs \
                         WHERE run_id = ?1 AND node_id = ?2"
                    ),
                    params![run_id, node_id],
                    read_output,
                )
                .optional()
                .map_err(db_err)?;
            row.map(finish_output).transpose()
        })
    }

    fn get_latest_terminal(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, Result<Option<WorkflowOutput>>> {
        let (workflow_id, node_id) = (workflow_id.to_string(), node_id.to_string());
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {OUTPUT_COLUMNS} FROM workflow_outputs
                         WHERE workflow_id = ?1 AND node_id = ?2 AND skipped = 0
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![workflow_id, node_id],
                    read_output,
                )
                .optional()
                .map_err(db_err)?;
            row.map(finish_output).transpose()
        })
    }

    fn save(&self, output: &WorkflowOutput) -> BoxFuture<'_, Result<()>> {
        let output = output.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            insert_output(&conn, &output)
        })
    }

    fn save_with_certificate(
        &self,
        output: &WorkflowOutput,
        certificate: &Certificate,
    ) -> BoxFuture<'_, Result<()>> {
        let output = output.clone();
        let certificate = certificate.clone();
        Box::pin(async move {
            let mut conn = self.lock()?;
            let tx = conn.transaction().map_err(db_err)?;
            insert_certificate(&tx, &certificate)?;
            insert_output(&tx, &output)?;
            tx.commit().map_err(db_err)?;
            Ok(())
        })
    }
}

const CERT_COLUMNS: &str = "id, source, subject_alt_names, certificate, issuer_certificate, \
    private_key, key_algorithm, serial_number, issuer_org, valid_from, valid_to, \
    acme_account_url, acme_certificate_url, renewed_from_id, workflow_id, workflow_run_id, \
    workflow_node_id, created_at";

struct CertRow {
    cert: Certificate,
    sans: String,
    source: String,
}

fn read_certificate(row: &Row<'_>) -> rusqlite::Result<CertRow> {
    let created_at: String = row.get(17)?;
    Ok(CertRow {
        source: row.get(1)?,
        sans: row.get(2)?,
        cert: Certificate {
            id: row.get(0)?,
            source: CertificateSource::Request,
            subject_alt_names: vec![],
            certificate: row.get(3)?,
            issuer_certificate: row.get(4)?,
            private_key: row.get(5)?,
            key_algorithm: row.get(6)?,
            serial_number: row.get(7)?,
            issuer_org: row.get(8)?,
            valid_from: parse_opt_ts(row.get(9)?),
            valid_to: parse_opt_ts(row.get(10)?),
            acme_account_url: row.get(11)?,
            acme_certificate_url: row.get(12)?,
            renewed_from_id: row.get(13)?,
            workflow_id: row.get(14)?,
            workflow_run_id: row.get(15)?,
            workflow_node_id: row.get(16)?,
            created_at: parse_ts(&created_at),
        },
    })
}

fn finish_certificate(row: CertRow) -> Result<Certificate> {
    let mut cert = row.cert;
    cert.source = CertificateSource::parse(&row.source)
        .ok_or_else(|| {
            CertflowError::Database(format!("unknown certificate source '{}'", row.source))
        })?;
    cert.subject_alt_names = serde_json::from_str(&row.sans)?;
    Ok(cert)
}

impl CertificateRepository for SqliteStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Certificate>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!("SELECT {CERT_COLUMNS} FROM certificates WHERE id = ?1"),
                    params![id],
                    read_certificate,
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| CertflowError::NotFound(format!("certificate '{id}'")))?;
            finish_certificate(row)
        })
    }

    fn get_latest_by_workflow_node(
        &self,
        workflow_id: &str,
        node_id: &str,
    ) -> BoxFuture<'_, Result<Option<Certificate>>> {
        let (workflow_id, node_id) = (workflow_id.to_string(), node_id.to_string());
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {CERT_COLUMNS} FROM certificates
                         WHERE workflow_id = ?1 AND workflow_node_id = ?2
                         ORDER BY created_at DESC, rowid DESC
                         LIMIT 1"
                    ),
                    params![workflow_id, node_id],
                    read_certificate,
                )
                .optional()
                .map_err(db_err)?;
            row.map(finish_certificate).transpose()
        })
    }

    fn save(&self, certificate: &Certificate) -> BoxFuture<'_, Result<()>> {
        let certificate = certificate.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            insert_certificate(&conn, &certificate)
        })
    }
}

impl AccessRepository for SqliteStore {
    fn get(&self, id: &str) -> BoxFuture<'_, Result<Access>> {
        let id = id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let row = conn
                .query_row(
                    "SELECT id, name, provider, config FROM accesses WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(db_err)?
                .ok_or_else(|| CertflowError::NotFound(format!("access '{id}'")))?;
            let (id, name, provider, config) = row;
            Ok(Access {
                id,
                name,
                provider,
                config: serde_json::from_str(&config)?,
            })
        })
    }

    fn save(&self, access: &Access) -> BoxFuture<'_, Result<()>> {
        let access = access.clone();
        Box::pin(async move {
            let config = serde_json::to_string(&access.config)?;
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR REPLACE INTO accesses (id, name, provider, config)
                 VALUES (?1, ?2, ?3, ?4)",
                params![access.id, access.name, access.provider, config],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }
}
