/// Database row types matching migrations/0001_init.sql.

#[derive(Debug, sqlx::FromRow)]
pub struct WorkbookRow {
    pub exchange: String,
    pub trade_date: String,
    pub status: String,
    pub tier: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SheetRow {
    pub sheet_name: String,
    pub header_json: String,
    pub rows_json: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct ReportRow {
    pub trade_date: String,
    pub acquisition_status: String,
    pub contracts: i64,
    pub generated_at: i64,
}
