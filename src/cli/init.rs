// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 liveflow contributors

//! Init command - scaffold a sample pipeline

use colored::Colorize;
use miette::Result;
use serde_json::json;
use std::path::Path;

use crate::pipeline::{Row, DEFAULT_PIPELINE_FILE};
use crate::sources::write_ndjson;
use crate::utils::print_success;

/// Run the init command
pub async fn run(name: Option<String>, force: bool, verbose: bool) -> Result<()> {
    let project_name = name.unwrap_or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|p| p.file_name().map(|s| s.to_string_lossy().to_string()))
            .unwrap_or_else(|| "retail-sales".to_string())
    });

    println!("{}", "Initializing liveflow pipeline...".bold());
    println!();

    if Path::new(DEFAULT_PIPELINE_FILE).exists() && !force {
        return Err(miette::miette!(
            help = "Pass --force to overwrite it",
            "{} already exists",
            DEFAULT_PIPELINE_FILE
        ));
    }

    let pipeline_content = generate_retail_template(&project_name);

    // Write pipeline file
    std::fs::write(DEFAULT_PIPELINE_FILE, &pipeline_content)
        .map_err(|e| miette::miette!("Failed to write {}: {}", DEFAULT_PIPELINE_FILE, e))?;

    print_success(&format!("Created {}", DEFAULT_PIPELINE_FILE));

    // Create landing directories with a first batch of records
    for dir in ["data/customers", "data/sales"] {
        std::fs::create_dir_all(dir)
            .map_err(|e| miette::miette!("Failed to create directory '{}': {}", dir, e))?;
    }

    let customers = Path::new("data/customers/customers.csv");
    std::fs::write(customers, SAMPLE_CUSTOMERS)
        .map_err(|e| miette::miette!("Failed to write '{}': {}", customers.display(), e))?;
    print_success(&format!(
        "Created {} ({} records)",
        customers.display(),
        SAMPLE_CUSTOMERS.lines().count() - 1
    ));

    let orders = Path::new("data/sales/2024-01-01.json");
    let rows = sample_orders();
    write_ndjson(orders, &rows)
        .map_err(|e| miette::miette!("Failed to write '{}': {}", orders.display(), e))?;
    print_success(&format!("Created {} ({} records)", orders.display(), rows.len()));

    println!();
    println!("{}", "Pipeline initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Run {} to check the pipeline", "liveflow validate".cyan());
    println!("  2. Run {} to materialize every dataset", "liveflow run".cyan());
    println!(
        "  3. Drop more files into {} and run again; only new orders are read",
        "data/sales/".cyan()
    );
    println!();

    if verbose {
        println!("{}", "Generated pipeline:".dimmed());
        println!("{}", "─".repeat(50).dimmed());
        println!("{}", pipeline_content.dimmed());
    }

    Ok(())
}

const RETAIL_TEMPLATE: &str = r#"# liveflow pipeline definition
#
# Raw orders land in data/sales as newline-delimited JSON. Each run reads
# only the orders that arrived since the last run. Customers are a CSV
# export in data/customers.

name: "{name}"
description: "Retail sales: raw orders, cleaned orders, per-city rollups"

configuration:
  input_data: data

storage: .liveflow/state

sources:
  - name: raw_sales
    path: "${input_data}/sales/*.json"
  - name: raw_customers
    path: "${input_data}/customers/*.csv"

datasets:
  - name: customers
    kind: view
    comment: "The customers buying finished products"
    upstreams: [raw_customers]

  - name: sales_orders_raw
    kind: streaming_table
    tier: bronze
    comment: "The raw sales orders, ingested from the landing directory"
    upstreams: [raw_sales]
    properties:
      pipelines.autoOptimize.managed: "true"

  - name: sales_orders_cleaned
    kind: streaming_table
    tier: silver
    comment: "The cleaned sales orders with valid order numbers, partitioned by order_date"
    upstreams: [sales_orders_raw, customers]
    partition_cols: [order_date]
    transform:
      from: sales_orders_raw
      steps:
        - join: { with: customers, on: [customer_id], how: left }
        - with_column: { name: order_datetime, from: order_datetime, cast: timestamp }
        - with_column: { name: order_date, from: order_datetime, cast: date }
        - select:
            [customer_id, customer_name, number_of_line_items, order_datetime, order_date,
             order_number, ordered_products, state, city, loyalty_segment]
    expectations:
      - name: valid order_number
        check: { column: order_number, op: not_null }
        on_violation: drop

  - name: sales_order_in_la
    kind: table
    tier: gold
    comment: "Sales orders in LA"
    upstreams: [sales_orders_cleaned]
    transform:
      from: sales_orders_cleaned
      steps:
        - filter: { column: city, op: eq, value: "Los Angeles" }
        - explode: { column: ordered_products, as: product }
        - aggregate:
            group_by: [order_date, city, customer_id, customer_name, product.curr]
            sum: { sales: product.price, quantity: product.qty }
        - rename: { product.curr: currency }

  - name: sales_order_in_chicago
    kind: table
    tier: gold
    comment: "Sales orders in Chicago"
    upstreams: [sales_orders_cleaned]
    transform:
      from: sales_orders_cleaned
      steps:
        - filter: { column: city, op: eq, value: "Chicago" }
        - explode: { column: ordered_products, as: product }
        - aggregate:
            group_by: [order_date, city, customer_id, customer_name, product.curr]
            sum: { sales: product.price, quantity: product.qty }
        - rename: { product.curr: currency }

  - name: sales_gc
    kind: table
    tier: gold
    comment: "Chicago sales per customer and day, partitioned by day of week"
    upstreams: [sales_order_in_chicago]
    partition_cols: [order_day_of_week]
    transform:
      from: sales_order_in_chicago
      steps:
        - with_column: { name: order_day_of_week, from: order_date, cast: day_of_week }
        - select: [customer_id, customer_name, order_date, order_day_of_week, currency, sales]
    expectations:
      - name: positive sales
        check: { column: sales, op: gt, value: 0 }
        on_violation: warn
"#;

/// Customer export, header row first
const SAMPLE_CUSTOMERS: &str = "\
customer_id,customer_name,city,state,loyalty_segment
C-1001,Ada Lovelace,Chicago,IL,3
C-1002,Grace Hopper,Los Angeles,CA,2
C-1003,Linus Pauling,Chicago,IL,1
C-1004,Barbara Liskov,Los Angeles,CA,3
";

fn generate_retail_template(name: &str) -> String {
    RETAIL_TEMPLATE.replace("{name}", name)
}

fn rows(values: serde_json::Value) -> Vec<Row> {
    match values {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(row) => Some(row),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn product(name: &str, price: i64, qty: i64) -> serde_json::Value {
    json!({ "name": name, "curr": "USD", "price": price, "qty": qty })
}

/// 2024-01-01, as unix seconds in a string like the upstream export
fn sample_orders() -> Vec<Row> {
    rows(json!([
        { "order_number": "SO-5001", "customer_id": "C-1001", "order_datetime": "1704103200", "number_of_line_items": "2",
          "ordered_products": [product("Desk Lamp", 45, 2), product("Bulb", 15, 2)] },
        { "order_number": "SO-5002", "customer_id": "C-1002", "order_datetime": "1704106800", "number_of_line_items": "1",
          "ordered_products": [product("Office Chair", 75, 1)] },
        { "order_number": null, "customer_id": "C-1003", "order_datetime": "1704110400", "number_of_line_items": "1",
          "ordered_products": [product("Bookshelf", 40, 4)] },
        { "order_number": "SO-5004", "customer_id": "C-1001", "order_datetime": "1704114000", "number_of_line_items": "1",
          "ordered_products": [product("Monitor Arm", 60, 1)] },
        { "order_number": "SO-5005", "customer_id": "C-1004", "order_datetime": "1704117600", "number_of_line_items": "2",
          "ordered_products": [product("Standing Desk", 180, 1), product("Cable Tray", 15, 2)] },
        { "order_number": "SO-5006", "customer_id": "C-1003", "order_datetime": "1704121200", "number_of_line_items": "1",
          "ordered_products": [product("Footrest", 35, 1)] },
    ]))
}
