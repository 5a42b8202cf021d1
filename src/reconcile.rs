use crate::data::{date_to_unix_ms, history_schema};
use crate::error::Error;
use chrono::NaiveDate;
use datafusion::arrow::array::Array;
use datafusion::arrow::array::StringArray;
use datafusion::arrow::datatypes::DataType;
use datafusion::common::config::CsvOptions;
use datafusion::common::ScalarValue;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::functions_aggregate::count::count_udaf;
use datafusion::logical_expr::expr::WindowFunction;
use datafusion::logical_expr::ExprFunctionExt;
use datafusion::prelude::{col, lit, when, DataFrame, Expr};
use std::path::Path;

/// The columns a row is matched on. The external API exposes no stable
/// per-row identifier, so identity is the full tuple of these fields.
pub const COMPARISON_COLUMNS: &[&str] = &[
    "actionnum",
    "data",
    "request_type",
    "viewtype",
    "platfrom",
    "views",
    "clicks",
    "ctr",
    "audience",
    "cpm",
    "expense",
    "order_id",
    "order_number",
    "ozon_id",
    "ozon_id_ad_sku",
    "articul",
    "name",
    "orders",
    "price",
    "revenue",
    "search_price_perc",
    "search_price_rur",
];

/// Computes the Delta Set: rows of `fresh` that are genuinely absent from
/// the persisted window.
///
/// The persisted side is first narrowed to the requested date range and to
/// the campaigns actually re-fetched this run. Both sides are then stacked
/// and every row whose full comparison tuple occurs more than once is
/// removed from the working set entirely; of the survivors, only rows
/// without a store identity are returned. Inputs are not mutated, so the
/// same pair always yields the same delta.
pub async fn delta(
    history: DataFrame,
    fresh: DataFrame,
    date_from: NaiveDate,
    date_to: NaiveDate,
) -> Result<DataFrame, Error> {
    eprintln!("DBG delta: start");
    let campaigns = fetched_campaigns(&fresh).await?;
    eprintln!("DBG delta: got campaigns {:?}", campaigns);

    let windowed = if campaigns.is_empty() {
        history.filter(lit(false))?
    } else {
        let campaign_set = campaigns
            .iter()
            .map(|campaign| lit(campaign.as_str()))
            .collect::<Vec<_>>();
        history.filter(
            col("data")
                .between(
                    lit(ScalarValue::Date64(Some(date_to_unix_ms(date_from)))),
                    lit(ScalarValue::Date64(Some(date_to_unix_ms(date_to)))),
                )
                .and(col("actionnum").in_list(campaign_set, false)),
        )?
    };

    // fresh rows have no identity yet; align both sides on the store schema
    let fresh = fresh.with_column("id", lit(ScalarValue::Int64(None)))?;
    let schema = history_schema();
    let order: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let combined = normalize_missing(windowed.select_columns(&order)?)?
        .union(normalize_missing(fresh.select_columns(&order)?)?)?;

    // count(1) over (partition by <comparison tuple>); partitioning treats
    // NULLs as equal, unlike a join on the same columns
    let match_count = Expr::WindowFunction(WindowFunction::new(count_udaf(), vec![lit(1)]))
        .partition_by(COMPARISON_COLUMNS.iter().map(|name| col(*name)).collect())
        .build()?
        .alias("match_count");

    eprintln!("DBG delta: combined built, collecting combined for diag");
    let diag = combined.clone().collect().await?;
    eprintln!("DBG delta: combined collected rows={}", diag.iter().map(|b| b.num_rows()).sum::<usize>());
    eprintln!("DBG delta: building window");
    let delta = combined
        .window(vec![match_count])?
        .filter(col("match_count").eq(lit(1i64)))?
        .filter(col("id").is_null())?
        .drop_columns(&["match_count", "id"])?;
    eprintln!("DBG delta: window built, returning");

    Ok(delta)
}

/// Every representation of "no value" the two sides use (SQL NULL, empty
/// string, literal `None`/`nan` text) must compare equal, so string columns
/// are folded onto NULL before matching.
fn normalize_missing(df: DataFrame) -> Result<DataFrame, Error> {
    let fields: Vec<(String, bool)> = df
        .schema()
        .fields()
        .iter()
        .map(|field| (field.name().clone(), field.data_type() == &DataType::Utf8))
        .collect();

    let mut exprs = Vec::with_capacity(fields.len());
    for (name, is_text) in fields {
        if is_text {
            let missing = col(name.as_str())
                .is_null()
                .or(col(name.as_str()).eq(lit("")))
                .or(col(name.as_str()).eq(lit("None")))
                .or(col(name.as_str()).eq(lit("nan")));
            exprs.push(
                when(missing, lit(ScalarValue::Utf8(None)))
                    .otherwise(col(name.as_str()))?
                    .alias(name.as_str()),
            );
        } else {
            exprs.push(col(name.as_str()));
        }
    }

    Ok(df.select(exprs)?)
}

/// Distinct campaign labels present in the fresh dataset.
async fn fetched_campaigns(fresh: &DataFrame) -> Result<Vec<String>, Error> {
    let batches = fresh
        .clone()
        .select(vec![col("actionnum")])?
        .distinct()?
        .collect()
        .await?;

    let mut campaigns = Vec::new();
    for batch in batches {
        let column = batch.column(0);
        let labels = column
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| Error::NoData {
                message: "actionnum column is not utf8".to_string(),
            })?;
        for index in 0..labels.len() {
            if labels.is_valid(index) {
                campaigns.push(labels.value(index).to_string());
            }
        }
    }
    Ok(campaigns)
}

/// Writes the delta as the run's semicolon-separated `into_db.csv`.
pub async fn write_delta_csv(delta: DataFrame, path: &Path) -> Result<(), Error> {
    let csv_options = CsvOptions {
        delimiter: b';',
        has_header: Some(true),
        ..Default::default()
    };
    delta
        .write_csv(
            &path.to_string_lossy(),
            DataFrameWriteOptions::default().with_single_file_output(true),
            Some(csv_options),
        )
        .await?;
    Ok(())
}
