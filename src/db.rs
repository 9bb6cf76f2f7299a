use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;

const DB_PATH: &str = "data/hcdn.sqlite";

pub fn connect() -> Result<Connection> {
    if let Some(dir) = std::path::Path::new(DB_PATH).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bills (
            file             TEXT PRIMARY KEY,
            bill_type        TEXT NOT NULL,
            source           TEXT NOT NULL,
            published_on     TEXT NOT NULL DEFAULT '',
            creation_date    TEXT NOT NULL,
            summary          TEXT NOT NULL DEFAULT '',
            revision_chamber TEXT NOT NULL DEFAULT '',
            revision_file    TEXT NOT NULL DEFAULT '',
            imported_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_bills_creation ON bills(creation_date);

        CREATE TABLE IF NOT EXISTS persons (
            name     TEXT PRIMARY KEY,
            party    TEXT NOT NULL DEFAULT 'NONE',
            province TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_persons_party ON persons(party);

        CREATE TABLE IF NOT EXISTS bill_subscribers (
            bill_file   TEXT NOT NULL,
            person_name TEXT NOT NULL,
            UNIQUE(bill_file, person_name)
        );
        CREATE INDEX IF NOT EXISTS idx_subscribers_bill ON bill_subscribers(bill_file);

        CREATE TABLE IF NOT EXISTS bill_committees (
            bill_file TEXT NOT NULL,
            name      TEXT NOT NULL,
            UNIQUE(bill_file, name)
        );
        CREATE INDEX IF NOT EXISTS idx_committees_bill ON bill_committees(bill_file);

        CREATE TABLE IF NOT EXISTS dictums (
            id          INTEGER PRIMARY KEY,
            bill_file   TEXT NOT NULL,
            source      TEXT NOT NULL,
            order_paper TEXT NOT NULL,
            date        TEXT NOT NULL,
            result      TEXT NOT NULL DEFAULT '',
            UNIQUE(bill_file, source, order_paper)
        );
        CREATE INDEX IF NOT EXISTS idx_dictums_bill ON dictums(bill_file);

        CREATE TABLE IF NOT EXISTS procedures (
            id        INTEGER PRIMARY KEY,
            bill_file TEXT NOT NULL,
            source    TEXT NOT NULL,
            topic     TEXT NOT NULL,
            date      TEXT NOT NULL,
            result    TEXT NOT NULL DEFAULT '',
            UNIQUE(bill_file, source)
        );
        CREATE INDEX IF NOT EXISTS idx_procedures_bill ON procedures(bill_file);

        CREATE TABLE IF NOT EXISTS import_checkpoint (
            id        INTEGER PRIMARY KEY CHECK (id = 1),
            last_page INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Records ──

/// A fully extracted bill with every referenced entity, ready to persist.
#[derive(Debug, Clone)]
pub struct BillRecord {
    pub file: String,
    pub bill_type: String,
    pub source: String,
    pub published_on: String,
    pub creation_date: NaiveDate,
    pub summary: String,
    pub revision_chamber: String,
    pub revision_file: String,
    pub subscribers: Vec<PersonRecord>,
    pub committees: Vec<String>,
    pub dictums: Vec<DictumRecord>,
    pub procedures: Vec<ProcedureRecord>,
}

#[derive(Debug, Clone)]
pub struct PersonRecord {
    pub name: String,
    pub party: String,
    pub province: String,
}

#[derive(Debug, Clone)]
pub struct DictumRecord {
    pub source: String,
    pub order_paper: String,
    pub date: NaiveDate,
    pub result: String,
}

#[derive(Debug, Clone)]
pub struct ProcedureRecord {
    pub source: String,
    pub topic: String,
    pub date: NaiveDate,
    pub result: String,
}

// ── Persistence ──

/// Persist one extracted bill inside a single transaction.
///
/// Referenced entities (persons, dictums, procedures) are upserted before the
/// owning bill row, so a committed bill never points at an entity that failed
/// to write. Subscriber and committee links are rewritten wholesale, which
/// keeps reprocessing the same fragment convergent.
pub fn persist_bill(conn: &Connection, bill: &BillRecord) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut person_stmt = tx.prepare_cached(
            "INSERT INTO persons (name, party, province) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                 party = excluded.party,
                 province = excluded.province",
        )?;
        for p in &bill.subscribers {
            person_stmt.execute(rusqlite::params![p.name, p.party, p.province])?;
        }

        let mut dictum_stmt = tx.prepare_cached(
            "INSERT INTO dictums (bill_file, source, order_paper, date, result)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(bill_file, source, order_paper) DO UPDATE SET
                 date = excluded.date,
                 result = excluded.result",
        )?;
        for d in &bill.dictums {
            dictum_stmt.execute(rusqlite::params![
                bill.file,
                d.source,
                d.order_paper,
                d.date.to_string(),
                d.result,
            ])?;
        }

        let mut proc_stmt = tx.prepare_cached(
            "INSERT INTO procedures (bill_file, source, topic, date, result)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(bill_file, source) DO UPDATE SET
                 topic = excluded.topic,
                 date = excluded.date,
                 result = excluded.result",
        )?;
        for p in &bill.procedures {
            proc_stmt.execute(rusqlite::params![
                bill.file,
                p.source,
                p.topic,
                p.date.to_string(),
                p.result,
            ])?;
        }

        tx.prepare_cached(
            "INSERT OR REPLACE INTO bills
             (file, bill_type, source, published_on, creation_date, summary,
              revision_chamber, revision_file)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?
        .execute(rusqlite::params![
            bill.file,
            bill.bill_type,
            bill.source,
            bill.published_on,
            bill.creation_date.to_string(),
            bill.summary,
            bill.revision_chamber,
            bill.revision_file,
        ])?;

        tx.prepare_cached("DELETE FROM bill_subscribers WHERE bill_file = ?1")?
            .execute([&bill.file])?;
        let mut sub_stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO bill_subscribers (bill_file, person_name) VALUES (?1, ?2)",
        )?;
        for p in &bill.subscribers {
            sub_stmt.execute(rusqlite::params![bill.file, p.name])?;
        }

        tx.prepare_cached("DELETE FROM bill_committees WHERE bill_file = ?1")?
            .execute([&bill.file])?;
        let mut com_stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO bill_committees (bill_file, name) VALUES (?1, ?2)",
        )?;
        for name in &bill.committees {
            com_stmt.execute(rusqlite::params![bill.file, name])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Checkpoint ──

/// Last page fully committed, or 0 when no run ever completed a page.
pub fn get_checkpoint(conn: &Connection) -> Result<u32> {
    let page = conn
        .query_row(
            "SELECT last_page FROM import_checkpoint WHERE id = 1",
            [],
            |r| r.get::<_, u32>(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(page.unwrap_or(0))
}

/// Advance the checkpoint. The MAX() guard makes the write monotone, so a
/// late or repeated call can never regress a committed page.
pub fn set_checkpoint(conn: &Connection, page: u32) -> Result<()> {
    conn.execute(
        "INSERT INTO import_checkpoint (id, last_page) VALUES (1, ?1)
         ON CONFLICT(id) DO UPDATE SET last_page = MAX(last_page, excluded.last_page)",
        [page],
    )?;
    Ok(())
}

/// Overwrite the checkpoint unconditionally. Operator tool for reprocessing;
/// the import path itself only ever advances through [`set_checkpoint`].
pub fn force_checkpoint(conn: &Connection, page: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO import_checkpoint (id, last_page) VALUES (1, ?1)",
        [page],
    )?;
    Ok(())
}

// ── Queries ──

/// Filter for bill listings: date range, subscriber-party membership and
/// exact file match, mirroring the lte/gte/in/eq operators the read side uses.
#[derive(Debug, Default)]
pub struct BillFilter {
    pub file: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub parties: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BillListRow {
    pub file: String,
    pub bill_type: String,
    pub source: String,
    pub creation_date: String,
    pub summary: String,
    pub subscribers: i64,
}

pub fn find_bills(conn: &Connection, filter: &BillFilter, limit: usize) -> Result<Vec<BillListRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(file) = &filter.file {
        conditions.push(format!("b.file = ?{}", params.len() + 1));
        params.push(Box::new(file.clone()));
    }
    if let Some(from) = filter.from {
        conditions.push(format!("b.creation_date >= ?{}", params.len() + 1));
        params.push(Box::new(from.to_string()));
    }
    if let Some(to) = filter.to {
        conditions.push(format!("b.creation_date <= ?{}", params.len() + 1));
        params.push(Box::new(to.to_string()));
    }
    if !filter.parties.is_empty() {
        let placeholders: Vec<String> = filter
            .parties
            .iter()
            .map(|party| {
                params.push(Box::new(party.to_uppercase()));
                format!("?{}", params.len())
            })
            .collect();
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM bill_subscribers bs
                     JOIN persons p ON p.name = bs.person_name
                     WHERE bs.bill_file = b.file AND UPPER(p.party) IN ({}))",
            placeholders.join(", ")
        ));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT b.file, b.bill_type, b.source, b.creation_date, b.summary,
                (SELECT COUNT(*) FROM bill_subscribers bs WHERE bs.bill_file = b.file)
         FROM bills b{}
         ORDER BY b.creation_date DESC, b.file
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(BillListRow {
                file: row.get(0)?,
                bill_type: row.get(1)?,
                source: row.get(2)?,
                creation_date: row.get(3)?,
                summary: row.get(4)?,
                subscribers: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

#[derive(Debug, Serialize)]
pub struct Stats {
    pub bills: usize,
    pub persons: usize,
    pub dictums: usize,
    pub procedures: usize,
    pub committees: usize,
    pub last_page: u32,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let count = |table: &str| -> Result<usize> {
        Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))?)
    };
    Ok(Stats {
        bills: count("bills")?,
        persons: count("persons")?,
        dictums: count("dictums")?,
        procedures: count("procedures")?,
        committees: count("bill_committees")?,
        last_page: get_checkpoint(conn)?,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn sample_bill(file: &str) -> BillRecord {
        BillRecord {
            file: file.to_string(),
            bill_type: "PROYECTO DE LEY".to_string(),
            source: "Diputados".to_string(),
            published_on: "Trámite Parlamentario 12".to_string(),
            creation_date: NaiveDate::from_ymd_opt(2010, 3, 5).unwrap(),
            summary: "Régimen de promoción".to_string(),
            revision_chamber: String::new(),
            revision_file: String::new(),
            subscribers: vec![PersonRecord {
                name: "Juan Perez".to_string(),
                party: "UCR".to_string(),
                province: "Buenos Aires".to_string(),
            }],
            committees: vec!["PRESUPUESTO Y HACIENDA".to_string()],
            dictums: vec![DictumRecord {
                source: "Diputados".to_string(),
                order_paper: "OD 1234".to_string(),
                date: NaiveDate::from_ymd_opt(2010, 6, 1).unwrap(),
                result: "APROBADO".to_string(),
            }],
            procedures: vec![ProcedureRecord {
                source: "Senado".to_string(),
                topic: "Consideración".to_string(),
                date: NaiveDate::from_ymd_opt(2010, 8, 2).unwrap(),
                result: String::new(),
            }],
        }
    }

    #[test]
    fn persist_is_idempotent() {
        let conn = test_conn();
        let bill = sample_bill("0001-D-2010");
        persist_bill(&conn, &bill).unwrap();
        persist_bill(&conn, &bill).unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.bills, 1);
        assert_eq!(stats.persons, 1);
        assert_eq!(stats.dictums, 1);
        assert_eq!(stats.procedures, 1);
        assert_eq!(stats.committees, 1);

        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM bill_subscribers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 1);
    }

    #[test]
    fn repeat_sighting_overwrites_person() {
        // "Juan Perez" signs two bills with different provinces: one person
        // row remains, carrying the most recent upsert.
        let conn = test_conn();
        persist_bill(&conn, &sample_bill("0001-D-2010")).unwrap();

        let mut second = sample_bill("0002-D-2010");
        second.subscribers[0].province = "Córdoba".to_string();
        persist_bill(&conn, &second).unwrap();

        let (count, province): (i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(province) FROM persons WHERE name = 'Juan Perez'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(province, "Córdoba");
    }

    #[test]
    fn checkpoint_defaults_to_zero_and_never_regresses() {
        let conn = test_conn();
        assert_eq!(get_checkpoint(&conn).unwrap(), 0);

        set_checkpoint(&conn, 120).unwrap();
        assert_eq!(get_checkpoint(&conn).unwrap(), 120);

        // A stale writer reporting an older page must not move it back.
        set_checkpoint(&conn, 118).unwrap();
        assert_eq!(get_checkpoint(&conn).unwrap(), 120);

        set_checkpoint(&conn, 121).unwrap();
        assert_eq!(get_checkpoint(&conn).unwrap(), 121);
    }

    #[test]
    fn find_bills_filters_by_date_and_party() {
        let conn = test_conn();
        persist_bill(&conn, &sample_bill("0001-D-2010")).unwrap();

        let mut other = sample_bill("0002-D-2012");
        other.creation_date = NaiveDate::from_ymd_opt(2012, 1, 10).unwrap();
        other.subscribers[0].name = "Ana Gomez".to_string();
        other.subscribers[0].party = "PJ".to_string();
        persist_bill(&conn, &other).unwrap();

        let filter = BillFilter {
            from: Some(NaiveDate::from_ymd_opt(2011, 1, 1).unwrap()),
            ..Default::default()
        };
        let rows = find_bills(&conn, &filter, 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file, "0002-D-2012");

        let filter = BillFilter {
            parties: vec!["pj".to_string()],
            ..Default::default()
        };
        let rows = find_bills(&conn, &filter, 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].file, "0002-D-2012");
        assert_eq!(rows[0].subscribers, 1);

        let filter = BillFilter {
            file: Some("0001-D-2010".to_string()),
            ..Default::default()
        };
        assert_eq!(find_bills(&conn, &filter, 50).unwrap().len(), 1);
    }
}
