//! Controllers shipped with the binary.

use serde_json::Value;

use crate::config::{ControllerConfig, JoinSpec, OutputConfig, SourceConfig};
use crate::controller::{Controller, WriteDecision};
use crate::convert::{Converter, Formatter};
use crate::error::PipelineResult;
use crate::parser::{Dialect, Location};
use crate::row::Row;

/// Service codes accepted as-is by [`ShippingController`]
const KNOWN_SERVICES: [&str; 3] = ["7723", "7710", "7730"];

const DEFAULT_SERVICE: &str = "7723";

/// Price from which shipping is folded into the item price
const FREE_SHIPPING_FROM: f64 = 40.0;

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn as_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Rules shared by the marketplace controllers: only `u0…` items,
/// normalized service codes, free shipping from 40.
fn normalize_offer(row: &mut Row) -> PipelineResult<bool> {
    let item = row.get("ItemNo")?;
    if !item.as_str().is_some_and(|s| s.starts_with("u0")) {
        return Ok(false);
    }

    let service = row.get("Service")?.as_str().unwrap_or_default().to_string();
    let service = if KNOWN_SERVICES.contains(&service.as_str()) {
        service
    } else {
        row.set("Service", DEFAULT_SERVICE);
        DEFAULT_SERVICE.to_string()
    };

    if service == DEFAULT_SERVICE {
        row.set("Dispatch", 1);

        let price = as_f64(row.get("Price")?);
        if price >= FREE_SHIPPING_FROM {
            let shipping = as_f64(row.get("Shipping")?);
            row.set("Price", price + shipping);
            row.set("Shipping", 0.0);
            row.set("Connect2ItemPrice", 0);
        }
    }

    Ok(true)
}

// =============================================================================
// shipping
// =============================================================================

/// Normalizes marketplace offers (`ItemNo`, `Service`, `Price`, `Shipping`).
#[derive(Debug, Default)]
pub struct ShippingController;

impl Controller for ShippingController {
    fn config(&self) -> ControllerConfig {
        ControllerConfig::new()
            .with_input(
                SourceConfig::new("main")
                    .with_converter("Price", Converter::comma_decimal())
                    .with_converter("Shipping", Converter::comma_decimal()),
            )
            .with_output(
                OutputConfig::new("target")
                    .with_formatter("Price", Formatter::comma_decimal())
                    .with_formatter("Shipping", Formatter::comma_decimal()),
            )
    }

    fn handle(&mut self, row: &mut Row) -> PipelineResult<WriteDecision> {
        normalize_offer(row)?;
        Ok(WriteDecision::WriteIfChanged)
    }

    fn description(&self) -> String {
        "Normalize service codes and fold shipping into prices from 40".to_string()
    }
}

// =============================================================================
// articles
// =============================================================================

/// Recomputes `Shipping` from article number and dispatch time.
#[derive(Debug, Default)]
pub struct ArticlesController;

pub const ARTICLE_NO: i64 = 1234;

impl Controller for ArticlesController {
    fn config(&self) -> ControllerConfig {
        ControllerConfig::new()
            .with_input(
                SourceConfig::new("main")
                    .with_dialect(Dialect::default().with_delimiter('|'))
                    .with_converter("ArticleNo", Converter::int())
                    .with_converter("DispatchTime", Converter::int())
                    .with_converter("Price", Converter::comma_decimal())
                    .with_fields(["Price", "Shipping", "DispatchTime", "ArticleNo"]),
            )
            .with_output(OutputConfig::new("target").with_formatter("Price", Formatter::comma_decimal()))
    }

    fn handle(&mut self, row: &mut Row) -> PipelineResult<WriteDecision> {
        let shipping = as_i64(row.get("ArticleNo")?) + as_i64(row.get("DispatchTime")?);
        row.set("Shipping", shipping);
        row.set("ArticleNo", ARTICLE_NO);
        Ok(WriteDecision::WriteIfChanged)
    }

    fn description(&self) -> String {
        "Pipe-separated article lists: Shipping = ArticleNo + DispatchTime".to_string()
    }
}

// =============================================================================
// listings
// =============================================================================

/// Offers enriched with listing data from `listings.csv` and
/// `listing_names.csv`, capped at the first [`ListingsController::LIMIT`] rows.
#[derive(Debug, Default)]
pub struct ListingsController {
    rows: usize,
}

impl ListingsController {
    pub const LIMIT: usize = 50;

    pub const LISTINGS_FILE: &'static str = "listings.csv";
    pub const NAMES_FILE: &'static str = "listing_names.csv";
}

impl Controller for ListingsController {
    fn config(&self) -> ControllerConfig {
        let pipes = Dialect::default().with_delimiter('|');

        ControllerConfig::new()
            .with_input(
                SourceConfig::new("main")
                    .with_converter("Price", Converter::comma_decimal())
                    .with_converter("Shipping", Converter::comma_decimal())
                    .with_join("test"),
            )
            .with_output(
                OutputConfig::new("target")
                    .with_dialect(Dialect::default().with_delimiter('\t'))
                    .with_fields(["AuctionID", "Dispatch", "Service", "ListingID", "ListingName"]),
            )
            .with_join(JoinSpec::new(
                SourceConfig::new("test")
                    .with_location(Location::file(Self::LISTINGS_FILE))
                    .with_dialect(pipes.clone())
                    .with_join("nested"),
                "AuctionID",
                "auction_id",
            ))
            .with_join(JoinSpec::new(
                SourceConfig::new("nested")
                    .with_location(Location::file(Self::NAMES_FILE))
                    .with_dialect(pipes),
                "listing_id",
                "ID",
            ))
    }

    fn begin_run(&mut self) {
        self.rows = 0;
    }

    fn handle(&mut self, row: &mut Row) -> PipelineResult<WriteDecision> {
        self.rows += 1;
        if self.rows > Self::LIMIT {
            return Ok(WriteDecision::Skip);
        }
        if !normalize_offer(row)? {
            return Ok(WriteDecision::Skip);
        }

        if let Some(listing) = row.join("test")? {
            let id = listing.get("listing_id")?.clone();
            let name = listing.join_field("nested", "Name")?.unwrap_or(Value::Null);
            row.set("ListingID", id);
            row.set("ListingName", name);
        }

        Ok(WriteDecision::WriteIfChanged)
    }

    fn description(&self) -> String {
        format!(
            "Attach listing ids and names from {} / {} (first {} rows)",
            Self::LISTINGS_FILE,
            Self::NAMES_FILE,
            Self::LIMIT
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunOptions;
    use crate::parser::MemoryBuffer;
    use crate::pipeline::{execute, Pipeline};

    #[test]
    fn test_shipping_controller() {
        let buffer = MemoryBuffer::new();
        let input = "ItemNo;Service;Price;Shipping;Dispatch;Connect2ItemPrice\n\
                     u01;9999;45,5;4,5;0;1\n\
                     x01;9999;45,5;4,5;0;1\n\
                     u02;7710;10;4,5;0;1\n";

        let report = execute(
            &mut ShippingController,
            Location::inline(input),
            Location::Memory(buffer.clone()),
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(
            buffer.contents(),
            "ItemNo;Service;Price;Shipping;Dispatch;Connect2ItemPrice\n\
             u01;7723;50,0;0,0;1;0\n"
        );
        assert_eq!(report.rows_changed, 1);
        assert_eq!(report.changes("Service"), 1);
    }

    #[test]
    fn test_articles_controller() {
        let buffer = MemoryBuffer::new();
        let input = "ArticleNo|Price|Shipping|DispatchTime|Name\n7|12,5|0|3|lamp\n";

        execute(
            &mut ArticlesController,
            Location::inline(input),
            Location::Memory(buffer.clone()),
            &RunOptions::default(),
        )
        .unwrap();

        assert_eq!(
            buffer.contents(),
            "Price;Shipping;DispatchTime;ArticleNo\n12,5;10;3;1234\n"
        );
    }

    #[test]
    fn test_listings_controller_with_joins() {
        let dir = tempfile::tempdir().unwrap();
        let listings = dir.path().join("listings.csv");
        let names = dir.path().join("names.csv");
        std::fs::write(&listings, "auction_id|listing_id\nA1|L1\n").unwrap();
        std::fs::write(&names, "ID|Name\nL1|Lamp\n").unwrap();

        let mut controller = ListingsController::default();
        let mut config = controller.config();
        config.input.location = Some(Location::inline(
            "AuctionID;ItemNo;Service;Price;Shipping\nA1;u01;7723;10;2\nA2;u02;7710;10;2\nA3;x;7723;10;2\n",
        ));
        let buffer = MemoryBuffer::new();
        config.output.location = Some(Location::Memory(buffer.clone()));
        config.joins.get_mut("test").unwrap().source.location = Some(Location::file(&listings));
        config.joins.get_mut("nested").unwrap().source.location = Some(Location::file(&names));

        let mut pipeline = Pipeline::with_config(&mut controller, config);
        pipeline.begin().unwrap();
        pipeline.run().unwrap();
        let report = pipeline.finish().unwrap();

        assert_eq!(
            buffer.contents(),
            "AuctionID\tDispatch\tService\tListingID\tListingName\nA1\t1\t7723\tL1\tLamp\n"
        );
        assert_eq!(report.rows_processed, 3);
    }

    #[test]
    fn test_listings_limit() {
        let mut controller = ListingsController {
            rows: ListingsController::LIMIT,
        };
        let mut row = Row::new(match serde_json::json!({"ItemNo": "u01"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        });
        assert_eq!(controller.handle(&mut row).unwrap(), WriteDecision::Skip);

        controller.begin_run();
        assert_eq!(controller.rows, 0);
    }

    #[test]
    fn test_listings_counter_resets_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let listings = dir.path().join("listings.csv");
        let names = dir.path().join("names.csv");
        std::fs::write(&listings, "auction_id|listing_id\nA1|L1\n").unwrap();
        std::fs::write(&names, "ID|Name\nL1|Lamp\n").unwrap();

        let mut controller = ListingsController {
            rows: ListingsController::LIMIT,
        };
        let mut config = controller.config();
        config.input.location = Some(Location::inline("AuctionID;ItemNo;Service;Price;Shipping\nA1;u01;7723;10;2\n"));
        let buffer = MemoryBuffer::new();
        config.output.location = Some(Location::Memory(buffer.clone()));
        config.joins.get_mut("test").unwrap().source.location = Some(Location::file(&listings));
        config.joins.get_mut("nested").unwrap().source.location = Some(Location::file(&names));

        let mut pipeline = Pipeline::with_config(&mut controller, config);
        pipeline.begin().unwrap();
        pipeline.run().unwrap();
        pipeline.finish().unwrap();

        assert_eq!(
            buffer.contents(),
            "AuctionID\tDispatch\tService\tListingID\tListingName\nA1\t1\t7723\tL1\tLamp\n"
        );
    }
}
