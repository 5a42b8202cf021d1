use crate::data::CanonicalRow;
use crate::error::Error;
use chrono::NaiveDate;
use csv::StringRecord;
use log::warn;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const RAW_DATE_FORMAT: &str = "%d.%m.%Y";

/// Rows with fewer populated cells than this are service noise (separator
/// lines, partial totals) and are dropped. The count includes the three
/// provenance fields attached to every row.
const MIN_POPULATED_CELLS: usize = 10;
const PROVENANCE_CELLS: usize = 3;

/// Reads every statistics csv under `{run_dir}/{account_id}-{client_id}/statistics`
/// and merges the two legacy header layouts into canonical rows.
///
/// Account folders whose name does not decompose into `{account_id}-{client_id}`
/// are skipped, as are files that cannot be parsed; neither is fatal to the
/// rest of the run.
pub fn build_dataset(run_dir: &Path) -> Result<Vec<CanonicalRow>, Error> {
    let mut rows = Vec::new();
    if !run_dir.is_dir() {
        return Ok(rows);
    }

    let mut account_dirs: Vec<PathBuf> = fs::read_dir(run_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    account_dirs.sort();

    for dir in account_dirs {
        let folder = match dir.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        let Some((account_id, api_id)) = split_account_folder(&folder) else {
            warn!("skipping {folder}: not an {{account_id}}-{{client_id}} folder");
            continue;
        };

        let statistics_dir = dir.join("statistics");
        if !statistics_dir.is_dir() {
            continue;
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&statistics_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect();
        files.sort();

        for file in files {
            match parse_report_file(&file, account_id, api_id) {
                Ok(mut file_rows) => rows.append(&mut file_rows),
                Err(err) => warn!("skipping {}: {err}", file.display()),
            }
        }
    }

    Ok(rows)
}

/// The client id itself contains dashes, so only the first one separates
/// the account id from it.
fn split_account_folder(folder: &str) -> Option<(&str, &str)> {
    match folder.split_once('-') {
        Some((account_id, api_id)) if !account_id.is_empty() && !api_id.is_empty() => {
            Some((account_id, api_id))
        }
        _ => None,
    }
}

/// Parses one raw report file.
///
/// The layout is: a title line carrying the campaign label, the real header
/// line, the data rows, and a totals footer. Both legacy header layouts are
/// folded into the canonical shape here; each canonical field lists its
/// candidate source headers and the first non-blank one wins.
pub fn parse_report_file(
    path: &Path,
    account_id: &str,
    api_id: &str,
) -> Result<Vec<CanonicalRow>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let records: Vec<StringRecord> = reader.records().collect::<Result<_, _>>()?;

    if records.len() < 3 {
        return Err(Error::MalformedReport {
            path: path.display().to_string(),
            message: "missing title, header or totals line".to_string(),
        });
    }

    let campaign = campaign_label(&records[0]).ok_or_else(|| Error::MalformedReport {
        path: path.display().to_string(),
        message: "no campaign label in the title line".to_string(),
    })?;
    let header = &records[1];

    let mut rows = Vec::new();
    // the last record is the synthetic totals row
    for record in &records[2..records.len() - 1] {
        let cells = cell_map(header, record);
        if cells.len() + PROVENANCE_CELLS < MIN_POPULATED_CELLS {
            continue;
        }
        match canonical_row(&cells, account_id, api_id, &campaign) {
            Some(row) => rows.push(row),
            None => warn!("{}: row without a parsable date, dropped", path.display()),
        }
    }

    Ok(rows)
}

/// The title line ends with a field like
/// `Кампания № 7656043, период 01.05.2024-05.05.2024`; the campaign label is
/// the last token before the first comma.
fn campaign_label(title: &StringRecord) -> Option<String> {
    let last_field = title.iter().rev().find(|field| !field.trim().is_empty())?;
    let before_comma = last_field.split(',').next()?;
    before_comma
        .split_whitespace()
        .last()
        .map(|label| label.to_string())
}

/// Maps populated cells by header name. Unnamed columns and blank cells are
/// dropped here, so lookups below see only real values.
fn cell_map<'a>(header: &'a StringRecord, record: &'a StringRecord) -> HashMap<&'a str, &'a str> {
    let mut cells = HashMap::new();
    for (index, name) in header.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = record.get(index).unwrap_or("").trim();
        if value.is_empty() {
            continue;
        }
        cells.insert(name, value);
    }
    cells
}

fn canonical_row(
    cells: &HashMap<&str, &str>,
    account_id: &str,
    api_id: &str,
    campaign: &str,
) -> Option<CanonicalRow> {
    let data = date(cells, &["Дата", "День"])?;

    Some(CanonicalRow {
        api_id: api_id.to_string(),
        account_id: account_id.to_string(),
        actionnum: campaign.to_string(),
        data,
        pagetype: text(cells, &["Тип страницы"]),
        viewtype: text(cells, &["Условие показа"]),
        request_type: text(cells, &["Тип условия"]),
        platfrom: text(cells, &["Платформа"]),
        banner: text(cells, &["Баннер"]),
        sku: text(cells, &["SKU"]),
        articul: text(cells, &["Артикул"]),
        ozon_id: text(cells, &["Ozon ID"]),
        ozon_id_ad_sku: text(cells, &["Ozon ID рекламируемого товара"]),
        name: text(cells, &["Наименование", "Название товара"]),
        order_id: text(cells, &["ID заказа"]),
        order_number: text(cells, &["Номер заказа"]),
        views: int(cells, &["Показы"]),
        clicks: int(cells, &["Клики"]),
        audience: int(cells, &["Охват"]),
        orders: int(cells, &["Количество", "Заказы"]),
        orders_model: int(cells, &["Заказы модели"]),
        ctr: float(cells, &["CTR (%)"]),
        cpm: float(cells, &["Средняя ставка за 1000 показов (руб.)"]),
        expense: float(cells, &["Расход (руб., с НДС)", "Расход, руб."]),
        revenue: float(cells, &["Выручка (руб.)", "Стоимость, руб."]),
        revenue_model: float(cells, &["Выручка с заказов модели (руб.)"]),
        price: float(cells, &["Цена продажи", "Цена товара (руб.)"]),
        avrg_bid: float(cells, &["Средняя ставка (руб.)"]),
        exp_bonus: float(cells, &["Расход за минусом бонусов (руб., с НДС)"]),
        search_price_perc: float(cells, &["Ставка, %"]),
        search_price_rur: float(cells, &["Ставка, руб."]),
    })
}

fn raw<'a>(cells: &HashMap<&str, &'a str>, candidates: &[&str]) -> Option<&'a str> {
    candidates.iter().find_map(|name| cells.get(name).copied())
}

fn text(cells: &HashMap<&str, &str>, candidates: &[&str]) -> Option<String> {
    raw(cells, candidates).map(|value| value.to_string())
}

fn date(cells: &HashMap<&str, &str>, candidates: &[&str]) -> Option<NaiveDate> {
    raw(cells, candidates)
        .and_then(|value| NaiveDate::parse_from_str(value, RAW_DATE_FORMAT).ok())
}

fn int(cells: &HashMap<&str, &str>, candidates: &[&str]) -> Option<i64> {
    raw(cells, candidates).and_then(|value| value.parse().ok())
}

/// Report files carry decimal commas.
fn float(cells: &HashMap<&str, &str>, candidates: &[&str]) -> Option<f64> {
    raw(cells, candidates).and_then(|value| value.replace(',', ".").parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCHEME_A_REPORT: &str = "\
Отчёт по заказам;;;;;;;;;;Кампания № 123456, период 01.05.2024-05.05.2024
№;Дата;ID заказа;Номер заказа;Ozon ID;Ozon ID рекламируемого товара;Артикул;Наименование;Количество;Цена продажи;Выручка (руб.);Ставка, %;Ставка, руб.;Расход (руб., с НДС)
1;03.05.2024;98765;ORD-17;555123;555124;ART-9;Товар для дома;2;100,00;200,00;5,5;11,00;20,50
Всего;;;;;;;;2;;200,00;;;20,50
";

    const SCHEME_B_REPORT: &str = "\
Отчёт по кампании;;;;;;;;;Кампания № 7656043, период 01.05.2024-05.05.2024
№;День;Тип страницы;Условие показа;Платформа;Показы;Клики;CTR (%);Средняя ставка за 1000 показов (руб.);Расход, руб.
1;01.05.2024;Главная;trafaret;Android;1000;10;1,00;42,50;250,50
2;02.05.2024;Поиск;trafaret;iOS;500;5;1,00;42,50;125,25
Всего;;;;;1500;15;1,00;;375,75
";

    fn write_report(run_dir: &Path, folder: &str, file: &str, content: &str) -> PathBuf {
        let statistics = run_dir.join(folder).join("statistics");
        fs::create_dir_all(&statistics).unwrap();
        let path = statistics.join(file);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_scheme_a_report() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_report(temp_dir.path(), "7-abc", "campaigns_0.csv", SCHEME_A_REPORT);

        let rows = parse_report_file(&path, "7", "abc").unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.actionnum, "123456");
        assert_eq!(row.account_id, "7");
        assert_eq!(row.api_id, "abc");
        assert_eq!(row.data, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(row.order_id.as_deref(), Some("98765"));
        assert_eq!(row.order_number.as_deref(), Some("ORD-17"));
        assert_eq!(row.name.as_deref(), Some("Товар для дома"));
        assert_eq!(row.orders, Some(2));
        assert_eq!(row.price, Some(100.0));
        assert_eq!(row.revenue, Some(200.0));
        assert_eq!(row.expense, Some(20.5));
        assert_eq!(row.search_price_perc, Some(5.5));
        // scheme B columns are absent, not defaulted
        assert_eq!(row.views, None);
        assert_eq!(row.pagetype, None);
    }

    #[test]
    fn test_parse_scheme_b_report() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_report(temp_dir.path(), "7-abc", "campaigns_1.csv", SCHEME_B_REPORT);

        let rows = parse_report_file(&path, "7", "abc").unwrap();
        assert_eq!(rows.len(), 2);

        let row = &rows[0];
        assert_eq!(row.actionnum, "7656043");
        assert_eq!(row.data, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(row.pagetype.as_deref(), Some("Главная"));
        assert_eq!(row.platfrom.as_deref(), Some("Android"));
        assert_eq!(row.views, Some(1000));
        assert_eq!(row.clicks, Some(10));
        assert_eq!(row.ctr, Some(1.0));
        assert_eq!(row.expense, Some(250.5));
        assert_eq!(row.order_id, None);
    }

    #[test]
    fn test_paired_fields_take_first_populated_source() {
        // Both layouts fill a disjoint half of the paired fields; a merged
        // dataset must have every unioned field populated.
        let temp_dir = TempDir::new().unwrap();
        write_report(temp_dir.path(), "7-abc", "campaigns_0.csv", SCHEME_A_REPORT);
        write_report(temp_dir.path(), "7-abc", "campaigns_1.csv", SCHEME_B_REPORT);

        let rows = build_dataset(temp_dir.path()).unwrap();
        assert_eq!(rows.len(), 3);

        let scheme_a = rows.iter().find(|r| r.actionnum == "123456").unwrap();
        let scheme_b = rows.iter().find(|r| r.actionnum == "7656043").unwrap();
        assert!(scheme_a.name.is_some() && scheme_a.orders.is_some());
        assert!(scheme_a.revenue.is_some() && scheme_a.expense.is_some());
        assert!(scheme_b.views.is_some() && scheme_b.expense.is_some());
    }

    #[test]
    fn test_malformed_account_folder_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write_report(temp_dir.path(), "no_separator", "campaigns_0.csv", SCHEME_A_REPORT);
        write_report(temp_dir.path(), "7-abc", "campaigns_0.csv", SCHEME_B_REPORT);

        let rows = build_dataset(temp_dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.account_id == "7"));
    }

    #[test]
    fn test_client_id_with_dashes_keeps_remainder() {
        assert_eq!(
            split_account_folder("7-123-456@advertising.performance.ozon.ru"),
            Some(("7", "123-456@advertising.performance.ozon.ru"))
        );
        assert_eq!(split_account_folder("nodash"), None);
        assert_eq!(split_account_folder("-leading"), None);
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_report(
            temp_dir.path(),
            "7-abc",
            "campaigns_0.csv",
            "Отчёт;Кампания № 1, период\n№;Дата\n",
        );
        let result = parse_report_file(&path, "7", "abc");
        assert!(matches!(result.unwrap_err(), Error::MalformedReport { .. }));
    }

    #[test]
    fn test_sparse_rows_are_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let content = "\
Отчёт;;;;;;;;;Кампания № 99, период 01.05.2024-05.05.2024
№;День;Тип страницы;Условие показа;Платформа;Показы;Клики;CTR (%);Средняя ставка за 1000 показов (руб.);Расход, руб.
1;01.05.2024;Главная;trafaret;Android;1000;10;1,00;42,50;250,50
;02.05.2024;;;;;;;;
Всего;;;;;1000;10;1,00;;250,50
";
        let path = write_report(temp_dir.path(), "7-abc", "campaigns_0.csv", content);
        let rows = parse_report_file(&path, "7", "abc").unwrap();
        assert_eq!(rows.len(), 1);
    }
}
