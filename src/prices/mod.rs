pub mod coingecko;
pub mod table;
