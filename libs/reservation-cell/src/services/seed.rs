// libs/reservation-cell/src/services/seed.rs
use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use shared_models::Money;

use crate::error::ReservationError;
use crate::models::NewSlot;
use crate::services::slots::SlotRegistry;

const DEMO_SLOTS: &[(&str, &str, &str, (i32, u32, u32), (u32, u32), i64)] = &[
    ("Ayurveda Wellness Center", "Dr. Priya Sharma", "Panchakarma", (2024, 1, 15), (9, 0), 1500),
    ("Ayurveda Wellness Center", "Dr. Priya Sharma", "Panchakarma", (2024, 1, 15), (11, 0), 1500),
    ("Ayurveda Wellness Center", "Dr. Rajesh Kumar", "Ayurvedic Medicine", (2024, 1, 16), (10, 0), 800),
    ("Ayurveda Wellness Center", "Dr. Rajesh Kumar", "Ayurvedic Medicine", (2024, 1, 16), (14, 0), 800),
    ("Kerala Ayurveda Hospital", "Dr. Meera Nair", "Traditional Panchakarma", (2024, 1, 15), (8, 0), 2000),
    ("Kerala Ayurveda Hospital", "Dr. Meera Nair", "Traditional Panchakarma", (2024, 1, 15), (15, 0), 2000),
    ("Kerala Ayurveda Hospital", "Dr. Suresh Pillai", "Herbal Medicine", (2024, 1, 17), (9, 30), 1200),
    ("Himalayan Ayurveda Clinic", "Dr. Anand Mishra", "Detox Therapy", (2024, 1, 16), (7, 0), 1800),
    ("Himalayan Ayurveda Clinic", "Dr. Anand Mishra", "Detox Therapy", (2024, 1, 16), (16, 0), 1800),
    ("Himalayan Ayurveda Clinic", "Dr. Kavita Joshi", "Stress Management", (2024, 1, 18), (10, 30), 1000),
];

/// Populate an empty registry with the demo hospitals' slots. Returns how
/// many slots were created; an already populated registry is left alone.
pub async fn seed_demo_slots(registry: &SlotRegistry) -> Result<usize, ReservationError> {
    if !registry.list_all().await?.is_empty() {
        info!("Slots already exist, skipping demo seeding");
        return Ok(0);
    }

    for &(hospital, doctor, specialty, (year, month, day), (hour, minute), price) in DEMO_SLOTS {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| ReservationError::InvalidSlot(format!("bad demo date {}-{}-{}", year, month, day)))?;
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| ReservationError::InvalidSlot(format!("bad demo time {}:{}", hour, minute)))?;

        registry
            .create_slot(NewSlot {
                hospital_name: hospital.to_string(),
                doctor_name: doctor.to_string(),
                specialty: specialty.to_string(),
                date,
                time,
                price: Money::from_major(price),
            })
            .await?;
    }

    info!("Seeded {} demo slots", DEMO_SLOTS.len());
    Ok(DEMO_SLOTS.len())
}
