use crate::error::Error;
use chrono::{NaiveDate, NaiveDateTime};
use datafusion::arrow::array::{
    Date64Builder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::prelude::{DataFrame, SessionContext};
use std::sync::Arc;

/// One record of the unified report schema.
///
/// Column names follow the destination warehouse table verbatim, including
/// its historical misspellings (`platfrom`, `articul`). Missing source
/// fields stay `None`; the reconciliation step maps every representation of
/// "no value" onto SQL NULL before comparing.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRow {
    pub api_id: String,
    pub account_id: String,
    /// Campaign label parsed from the report title line.
    pub actionnum: String,
    pub data: NaiveDate,
    pub pagetype: Option<String>,
    pub viewtype: Option<String>,
    pub request_type: Option<String>,
    pub platfrom: Option<String>,
    pub banner: Option<String>,
    pub sku: Option<String>,
    pub articul: Option<String>,
    pub ozon_id: Option<String>,
    pub ozon_id_ad_sku: Option<String>,
    pub name: Option<String>,
    pub order_id: Option<String>,
    pub order_number: Option<String>,
    pub views: Option<i64>,
    pub clicks: Option<i64>,
    pub audience: Option<i64>,
    pub orders: Option<i64>,
    pub orders_model: Option<i64>,
    pub ctr: Option<f64>,
    pub cpm: Option<f64>,
    pub expense: Option<f64>,
    pub revenue: Option<f64>,
    pub revenue_model: Option<f64>,
    pub price: Option<f64>,
    pub avrg_bid: Option<f64>,
    pub exp_bonus: Option<f64>,
    pub search_price_perc: Option<f64>,
    pub search_price_rur: Option<f64>,
}

fn canonical_fields() -> Vec<Field> {
    vec![
        Field::new("api_id", DataType::Utf8, false),
        Field::new("account_id", DataType::Utf8, false),
        Field::new("actionnum", DataType::Utf8, false),
        Field::new("data", DataType::Date64, false),
        Field::new("pagetype", DataType::Utf8, true),
        Field::new("viewtype", DataType::Utf8, true),
        Field::new("request_type", DataType::Utf8, true),
        Field::new("platfrom", DataType::Utf8, true),
        Field::new("banner", DataType::Utf8, true),
        Field::new("sku", DataType::Utf8, true),
        Field::new("articul", DataType::Utf8, true),
        Field::new("ozon_id", DataType::Utf8, true),
        Field::new("ozon_id_ad_sku", DataType::Utf8, true),
        Field::new("name", DataType::Utf8, true),
        Field::new("order_id", DataType::Utf8, true),
        Field::new("order_number", DataType::Utf8, true),
        Field::new("views", DataType::Int64, true),
        Field::new("clicks", DataType::Int64, true),
        Field::new("audience", DataType::Int64, true),
        Field::new("orders", DataType::Int64, true),
        Field::new("orders_model", DataType::Int64, true),
        Field::new("ctr", DataType::Float64, true),
        Field::new("cpm", DataType::Float64, true),
        Field::new("expense", DataType::Float64, true),
        Field::new("revenue", DataType::Float64, true),
        Field::new("revenue_model", DataType::Float64, true),
        Field::new("price", DataType::Float64, true),
        Field::new("avrg_bid", DataType::Float64, true),
        Field::new("exp_bonus", DataType::Float64, true),
        Field::new("search_price_perc", DataType::Float64, true),
        Field::new("search_price_rur", DataType::Float64, true),
    ]
}

/// Schema of freshly unified rows.
pub fn canonical_schema() -> Arc<Schema> {
    Arc::new(Schema::new(canonical_fields()))
}

/// Schema of the persisted analytics table: the canonical columns plus the
/// store-assigned `id`.
pub fn history_schema() -> Arc<Schema> {
    let mut fields = vec![Field::new("id", DataType::Int64, true)];
    fields.extend(canonical_fields());
    Arc::new(Schema::new(fields))
}

/// Materializes canonical rows into one Arrow [`RecordBatch`].
pub fn canonical_batch(rows: &[CanonicalRow]) -> Result<RecordBatch, Error> {
    let num_rows = rows.len();

    let mut api_id_builder = StringBuilder::new();
    let mut account_id_builder = StringBuilder::new();
    let mut actionnum_builder = StringBuilder::new();
    let mut data_builder = Date64Builder::with_capacity(num_rows);
    let mut pagetype_builder = StringBuilder::new();
    let mut viewtype_builder = StringBuilder::new();
    let mut request_type_builder = StringBuilder::new();
    let mut platfrom_builder = StringBuilder::new();
    let mut banner_builder = StringBuilder::new();
    let mut sku_builder = StringBuilder::new();
    let mut articul_builder = StringBuilder::new();
    let mut ozon_id_builder = StringBuilder::new();
    let mut ozon_id_ad_sku_builder = StringBuilder::new();
    let mut name_builder = StringBuilder::new();
    let mut order_id_builder = StringBuilder::new();
    let mut order_number_builder = StringBuilder::new();
    let mut views_builder = Int64Builder::with_capacity(num_rows);
    let mut clicks_builder = Int64Builder::with_capacity(num_rows);
    let mut audience_builder = Int64Builder::with_capacity(num_rows);
    let mut orders_builder = Int64Builder::with_capacity(num_rows);
    let mut orders_model_builder = Int64Builder::with_capacity(num_rows);
    let mut ctr_builder = Float64Builder::with_capacity(num_rows);
    let mut cpm_builder = Float64Builder::with_capacity(num_rows);
    let mut expense_builder = Float64Builder::with_capacity(num_rows);
    let mut revenue_builder = Float64Builder::with_capacity(num_rows);
    let mut revenue_model_builder = Float64Builder::with_capacity(num_rows);
    let mut price_builder = Float64Builder::with_capacity(num_rows);
    let mut avrg_bid_builder = Float64Builder::with_capacity(num_rows);
    let mut exp_bonus_builder = Float64Builder::with_capacity(num_rows);
    let mut search_price_perc_builder = Float64Builder::with_capacity(num_rows);
    let mut search_price_rur_builder = Float64Builder::with_capacity(num_rows);

    for row in rows {
        api_id_builder.append_value(&row.api_id);
        account_id_builder.append_value(&row.account_id);
        actionnum_builder.append_value(&row.actionnum);
        data_builder.append_value(date_to_unix_ms(row.data));
        pagetype_builder.append_option(row.pagetype.as_deref());
        viewtype_builder.append_option(row.viewtype.as_deref());
        request_type_builder.append_option(row.request_type.as_deref());
        platfrom_builder.append_option(row.platfrom.as_deref());
        banner_builder.append_option(row.banner.as_deref());
        sku_builder.append_option(row.sku.as_deref());
        articul_builder.append_option(row.articul.as_deref());
        ozon_id_builder.append_option(row.ozon_id.as_deref());
        ozon_id_ad_sku_builder.append_option(row.ozon_id_ad_sku.as_deref());
        name_builder.append_option(row.name.as_deref());
        order_id_builder.append_option(row.order_id.as_deref());
        order_number_builder.append_option(row.order_number.as_deref());
        views_builder.append_option(row.views);
        clicks_builder.append_option(row.clicks);
        audience_builder.append_option(row.audience);
        orders_builder.append_option(row.orders);
        orders_model_builder.append_option(row.orders_model);
        ctr_builder.append_option(row.ctr);
        cpm_builder.append_option(row.cpm);
        expense_builder.append_option(row.expense);
        revenue_builder.append_option(row.revenue);
        revenue_model_builder.append_option(row.revenue_model);
        price_builder.append_option(row.price);
        avrg_bid_builder.append_option(row.avrg_bid);
        exp_bonus_builder.append_option(row.exp_bonus);
        search_price_perc_builder.append_option(row.search_price_perc);
        search_price_rur_builder.append_option(row.search_price_rur);
    }

    Ok(RecordBatch::try_new(
        canonical_schema(),
        vec![
            Arc::new(api_id_builder.finish()),
            Arc::new(account_id_builder.finish()),
            Arc::new(actionnum_builder.finish()),
            Arc::new(data_builder.finish()),
            Arc::new(pagetype_builder.finish()),
            Arc::new(viewtype_builder.finish()),
            Arc::new(request_type_builder.finish()),
            Arc::new(platfrom_builder.finish()),
            Arc::new(banner_builder.finish()),
            Arc::new(sku_builder.finish()),
            Arc::new(articul_builder.finish()),
            Arc::new(ozon_id_builder.finish()),
            Arc::new(ozon_id_ad_sku_builder.finish()),
            Arc::new(name_builder.finish()),
            Arc::new(order_id_builder.finish()),
            Arc::new(order_number_builder.finish()),
            Arc::new(views_builder.finish()),
            Arc::new(clicks_builder.finish()),
            Arc::new(audience_builder.finish()),
            Arc::new(orders_builder.finish()),
            Arc::new(orders_model_builder.finish()),
            Arc::new(ctr_builder.finish()),
            Arc::new(cpm_builder.finish()),
            Arc::new(expense_builder.finish()),
            Arc::new(revenue_builder.finish()),
            Arc::new(revenue_model_builder.finish()),
            Arc::new(price_builder.finish()),
            Arc::new(avrg_bid_builder.finish()),
            Arc::new(exp_bonus_builder.finish()),
            Arc::new(search_price_perc_builder.finish()),
            Arc::new(search_price_rur_builder.finish()),
        ],
    )?)
}

/// Converts unified rows to a DataFrame for reconciliation.
pub fn rows_to_df(ctx: &SessionContext, rows: &[CanonicalRow]) -> Result<DataFrame, Error> {
    let batch = canonical_batch(rows)?;
    Ok(ctx.read_batch(batch)?)
}

pub fn date_to_unix_ms(date: NaiveDate) -> i64 {
    (date - NaiveDateTime::UNIX_EPOCH.date()).num_milliseconds()
}

#[cfg(test)]
pub(crate) fn blank_row(campaign: &str, date: NaiveDate) -> CanonicalRow {
    CanonicalRow {
        api_id: "api-1".to_string(),
        account_id: "7".to_string(),
        actionnum: campaign.to_string(),
        data: date,
        pagetype: None,
        viewtype: None,
        request_type: None,
        platfrom: None,
        banner: None,
        sku: None,
        articul: None,
        ozon_id: None,
        ozon_id_ad_sku: None,
        name: None,
        order_id: None,
        order_number: None,
        views: None,
        clicks: None,
        audience: None,
        orders: None,
        orders_model: None,
        ctr: None,
        cpm: None,
        expense: None,
        revenue: None,
        revenue_model: None,
        price: None,
        avrg_bid: None,
        exp_bonus: None,
        search_price_perc: None,
        search_price_rur: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_history_schema_extends_canonical() {
        let canonical = canonical_schema();
        let history = history_schema();
        assert_eq!(history.fields().len(), canonical.fields().len() + 1);
        assert_eq!(history.field(0).name(), "id");
        assert_eq!(history.field(1).name(), "api_id");
        assert_eq!(history.field(4).name(), "data");
    }

    #[test]
    fn test_date_to_unix_ms() {
        assert_eq!(date_to_unix_ms(date(2023, 10, 1)), 1696118400000);
        assert_eq!(date_to_unix_ms(date(1970, 1, 1)), 0);
    }

    #[tokio::test]
    async fn test_rows_to_df() {
        let ctx = SessionContext::new();
        let mut row = blank_row("7656043", date(2024, 5, 1));
        row.views = Some(1000);
        row.expense = Some(250.5);

        let df = rows_to_df(&ctx, &[row.clone(), row]).unwrap();
        let result = df.collect().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].num_rows(), 2);
        assert_eq!(result[0].num_columns(), 31);
    }

    #[tokio::test]
    async fn test_rows_to_df_empty() {
        let ctx = SessionContext::new();
        let df = rows_to_df(&ctx, &[]).unwrap();
        let result = df.collect().await.unwrap();
        assert!(result.iter().all(|batch| batch.num_rows() == 0));
    }
}
