//! Example: Extract decree records from one listing page
//!
//! Run with: cargo run -p arretekit --example extract_page [URL]
//!
//! Loads the page over HTTP and prints what the extractor found, without
//! downloading or archiving anything.

use arretekit::{extract_records, ExtractOptions, HttpListingPage, ListingPage};
use std::time::Duration;
use url::Url;

#[tokio::main]
async fn main() {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| arretekit::config::DEFAULT_LISTING_URL.to_string());
    let url = match Url::parse(&url) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid URL '{}': {}", url, e);
            std::process::exit(1);
        }
    };

    println!("ArreteKit extraction example");
    println!("============================\n");
    println!("URL: {}\n", url);

    let mut page = match HttpListingPage::new(Duration::from_secs(30)) {
        Ok(page) => page,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = page.navigate(&url, Duration::from_secs(30)).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    let html = page.content().await.unwrap_or_default();
    let base = page.current_url().unwrap_or(url);
    let _ = page.close().await;

    let records = extract_records(&html, &ExtractOptions::new(base));
    for (i, record) in records.iter().enumerate() {
        println!("{}. {}", i + 1, record.title);
        println!("   Number: {}", record.number);
        println!("   Date:   {}", record.publication_date);
        println!("   PDF:    {}", record.pdf_url);
        if record.is_traffic_related {
            println!("   (traffic)");
        }
        println!();
    }

    let traffic = records.iter().filter(|r| r.is_traffic_related).count();
    println!("============================");
    println!("{} records, {} traffic-related", records.len(), traffic);
}
