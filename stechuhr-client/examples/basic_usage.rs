//! Basic usage example for the portal session client
//!
//! This example demonstrates how to:
//! - Establish a session with credentials from the environment
//! - Inspect the last booking state recovered at login
//! - Book an arrival and hit the redundant-booking guard
//!
//! Note: This example needs a reachable portal instance and valid
//! credentials, and it books a real punch when it runs.

use stechuhr_client::{BookingStatus, Credentials, PortalError, PortalSession};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Connection settings from environment variables
    let url = std::env::var("STECHUHR_URL").expect("STECHUHR_URL environment variable not set");
    let username =
        std::env::var("STECHUHR_USER").expect("STECHUHR_USER environment variable not set");
    let password =
        std::env::var("STECHUHR_PASSWORD").expect("STECHUHR_PASSWORD environment variable not set");

    // Example 1: establish a session (runs the full login handshake)
    println!("=== Example 1: Establish ===");
    let credentials = Credentials::new(username, password);
    let mut session = PortalSession::establish(url.as_str(), &credentials)?;
    println!("✓ Session established against {}", url);

    // Example 2: the booking state recovered from the login response
    println!("\n=== Example 2: Last booking ===");
    match session.last_booking() {
        BookingStatus::Arrived => println!("Last punch was an arrival"),
        BookingStatus::Departed => println!("Last punch was a departure"),
        BookingStatus::Unknown => println!("No booking state could be recovered"),
    }

    // Example 3: book an arrival; a repeat is rejected before any network call
    println!("\n=== Example 3: Booking ===");
    match session.arrive() {
        Ok(()) => println!("✓ Arrival booked"),
        Err(PortalError::RedundantBooking(action)) => {
            println!("ℹ Skipped: last booking was already {}", action);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    match session.arrive() {
        Err(PortalError::RedundantBooking(_)) => println!("✓ Repeat arrival rejected locally"),
        Ok(()) => println!("✗ Repeat arrival went through"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
