use serde::{Deserialize, Serialize};

// Every center offers the same hourly slots.
pub const SLOT_TEMPLATE: [&str; 6] = [
    "09:00 AM - 10:00 AM",
    "10:00 AM - 11:00 AM",
    "11:00 AM - 12:00 PM",
    "02:00 PM - 03:00 PM",
    "03:00 PM - 04:00 PM",
    "04:00 PM - 05:00 PM",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSlot {
    pub id: String,
    pub time: String,
    pub available: bool,
}

pub fn slots_for_day(booked: &[String]) -> Vec<TimeSlot> {
    SLOT_TEMPLATE
        .iter()
        .enumerate()
        .map(|(i, time)| TimeSlot {
            id: format!("slot-{}", i + 1),
            time: time.to_string(),
            available: !booked.iter().any(|b| b == time),
        })
        .collect()
}

pub fn is_known_slot(time: &str) -> bool {
    SLOT_TEMPLATE.contains(&time)
}
