pub const CREATE_CONTRACTS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS contracts (
        id TEXT PRIMARY KEY,
        host_key TEXT NOT NULL,
        state TEXT NOT NULL,
        end_height INTEGER NOT NULL,
        record TEXT NOT NULL
    )";

pub const CREATE_CONTRACTS_STATE_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_contracts_state ON contracts (state)";

pub const CREATE_FILES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        record TEXT NOT NULL
    )";

pub async fn initialize_database(conn: &libsql::Connection) -> Result<(), libsql::Error> {
    conn.execute(CREATE_CONTRACTS_TABLE, ()).await?;
    conn.execute(CREATE_CONTRACTS_STATE_INDEX, ()).await?;
    conn.execute(CREATE_FILES_TABLE, ()).await?;
    conn.query("PRAGMA journal_mode = WAL;", ()).await?;
    conn.query("PRAGMA synchronous = NORMAL;", ()).await?;
    Ok(())
}
