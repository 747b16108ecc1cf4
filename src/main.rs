//! Day-Ahead Market Core Simulation.
//!
//! Walks the full lifecycle of a trading date: bids, gate closure, clearing,
//! contract completion and PnL against real-time prices.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use dam_core::*;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("Day-Ahead Market Core Simulation");
    println!("Hourly double auction, midpoint pricing, PnL vs real-time\n");

    scenario_1_basic_match()?;
    scenario_2_no_cross()?;
    scenario_3_partial_fills()?;
    scenario_4_pnl_lifecycle()?;
    scenario_5_bid_cap_and_gate()?;
    scenario_6_concurrent_clears()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn delivery_day() -> TradingDate {
    NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default()
}

fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Fresh engine on a manual clock set before gate closure.
fn setup() -> Result<(Engine, Arc<ManualClock>, Arc<PriceBook>), EngineError> {
    let clock = Arc::new(ManualClock::new(morning()));
    let prices = Arc::new(PriceBook::new());
    let engine = Engine::with_clock(EngineConfig::default(), prices.clone(), clock.clone())?;
    Ok((engine, clock, prices))
}

/// One buyer, one seller, one hour.
fn scenario_1_basic_match() -> Result<(), EngineError> {
    println!("Scenario 1: Basic Match\n");

    let (engine, _, _) = setup()?;
    let day = delivery_day();

    engine.submit_bid(BidRequest::buy(UserId(1), day, 10, dec!(100), dec!(50)))?;
    engine.submit_bid(BidRequest::sell(UserId(2), day, 10, dec!(100), dec!(40)))?;
    println!("  Alice bids BUY 100 MWh @ $50, hour 10");
    println!("  Bob offers SELL 100 MWh @ $40, hour 10\n");

    let result = engine.run_clearing(day)?;
    println!("  Contracts created: {}", result.contracts_created);

    for c in engine.contracts(ContractFilter::on_date(day)) {
        println!("  {} {} {} MWh @ ${} ({:?})", c.id, c.side, c.quantity, c.execution_price, c.status);
    }
    println!();
    Ok(())
}

/// Buyer below seller: nothing clears.
fn scenario_2_no_cross() -> Result<(), EngineError> {
    println!("Scenario 2: No Cross\n");

    let (engine, _, _) = setup()?;
    let day = delivery_day();

    engine.submit_bid(BidRequest::buy(UserId(1), day, 10, dec!(100), dec!(30)))?;
    engine.submit_bid(BidRequest::sell(UserId(2), day, 10, dec!(100), dec!(40)))?;

    let result = engine.run_clearing(day)?;
    println!("  BUY @ $30 vs SELL @ $40 -> {} contracts", result.contracts_created);
    println!("  Still pending: {}\n", engine.pending_bids(day, None).len());
    Ok(())
}

/// A large buy split across two sellers, then a rerun.
fn scenario_3_partial_fills() -> Result<(), EngineError> {
    println!("Scenario 3: Partial Fills and Idempotent Rerun\n");

    let (engine, _, _) = setup()?;
    let day = delivery_day();

    let big = engine.submit_bid(BidRequest::buy(UserId(1), day, 18, dec!(150), dec!(60)))?;
    engine.submit_bid(BidRequest::sell(UserId(2), day, 18, dec!(60), dec!(40)))?;
    engine.submit_bid(BidRequest::sell(UserId(3), day, 18, dec!(40), dec!(45)))?;

    let first = engine.run_clearing(day)?;
    println!("  First clear: {} contracts, {} MWh", first.contracts_created, first.matched_volume);

    if let Some(bid) = engine.bid(big.id) {
        println!("  Big buy: {:?}, {} of {} MWh left", bid.status, bid.remaining_quantity, bid.quantity);
    }

    let second = engine.run_clearing(day)?;
    println!("  Second clear: {} contracts", second.contracts_created);

    let summary = engine.clearing_summary(day);
    if let Some(vwap) = summary.average_price {
        println!("  Volume weighted price: ${}", vwap);
    }

    let unfilled = engine.settle_unfilled(day);
    println!("  Settled {} leftover bid(s) as UNFILLED\n", unfilled);
    Ok(())
}

/// Contract marked unrealized, then realized after completion.
fn scenario_4_pnl_lifecycle() -> Result<(), EngineError> {
    println!("Scenario 4: PnL Lifecycle\n");

    let (engine, _, prices) = setup()?;
    let day = delivery_day();
    let alice = UserId(1);

    engine.submit_bid(BidRequest::buy(alice, day, 10, dec!(100), dec!(50)))?;
    engine.submit_bid(BidRequest::sell(UserId(2), day, 10, dec!(100), dec!(40)))?;
    engine.run_clearing(day)?;

    if let Some(hour) = Hour::new(10) {
        prices.set_price(day, hour, PriceKind::RealTime, Price::new_unchecked(dec!(50)));
    }
    for (hour, price) in prices.prices_for(day, PriceKind::RealTime) {
        println!("  Real-time price for hour {} published at ${}", hour, price);
    }

    let before = engine.compute_pnl(alice, day)?;
    for r in &before {
        println!("  Alice {}: ${} {:?}", r.contract_id, r.pnl_amount, r.pnl_type);
    }

    let completed = engine.complete_contracts(CompletionTarget::Date(day))?;
    println!("  Completed {} contracts", completed);

    let summary = engine.pnl_summary(alice, day)?;
    println!(
        "  Alice total ${} (realized ${}, unrealized ${})",
        summary.total_pnl, summary.realized_pnl, summary.unrealized_pnl
    );

    if let Some(hour) = Hour::new(10) {
        prices.remove_price(day, hour, PriceKind::RealTime);
    }
    match engine.pnl_summary(alice, day) {
        Err(e) => println!("  Price withdrawn: {} ({}, retryable: {})", e, e.kind(), e.is_retryable()),
        Ok(s) => println!("  Summary unexpectedly computed: ${}", s.total_pnl),
    }

    for event in engine.recent_events(3) {
        println!("  {:?} {:?}", event.id, event.payload);
    }
    println!();
    Ok(())
}

/// Per-hour cap, then gate closure.
fn scenario_5_bid_cap_and_gate() -> Result<(), EngineError> {
    println!("Scenario 5: Bid Cap and Gate Closure\n");

    let (engine, clock, _) = setup()?;
    let day = delivery_day();

    for _ in 0..10 {
        engine.submit_bid(BidRequest::buy(UserId(1), day, 7, dec!(1), dec!(35)))?;
    }
    match engine.submit_bid(BidRequest::buy(UserId(1), day, 7, dec!(1), dec!(35))) {
        Err(e) => println!("  11th bid refused: {} ({})", e, e.kind()),
        Ok(bid) => println!("  11th bid unexpectedly accepted: {}", bid.id),
    }

    println!("  Gate closes at {}", engine.cutoff_for(day));
    clock.advance(Duration::hours(4));
    match engine.submit_bid(BidRequest::sell(UserId(2), day, 7, dec!(1), dec!(30))) {
        Err(e) => println!("  Late bid refused: {} ({})\n", e, e.kind()),
        Ok(bid) => println!("  Late bid unexpectedly accepted: {}\n", bid.id),
    }
    Ok(())
}

/// Many threads clearing the same date: contracts are created once.
fn scenario_6_concurrent_clears() -> Result<(), EngineError> {
    println!("Scenario 6: Concurrent Clears\n");

    let (engine, _, _) = setup()?;
    let day = delivery_day();

    for hour in 0..24u8 {
        engine.submit_bid(BidRequest::buy(UserId(1), day, hour, dec!(25), dec!(48)))?;
        engine.submit_bid(BidRequest::sell(UserId(2), day, hour, dec!(25), dec!(42)))?;
    }

    let created: Vec<usize> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| engine.run_clearing(day))).collect();
        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter_map(Result::ok)
            .map(|r| r.contracts_created)
            .collect()
    });

    println!("  Contracts per clear call: {:?}", created);
    println!("  Contracts stored: {}", engine.contracts(ContractFilter::on_date(day)).len());
    if let Some(midnight) = Hour::new(0) {
        let first_hour = engine.contracts(ContractFilter::on_date(day).with_hour(midnight));
        println!("  Contracts for hour {}: {}", midnight, first_hour.len());
    }
    Ok(())
}
