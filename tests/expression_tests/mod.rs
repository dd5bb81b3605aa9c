mod cancellation;
mod chaining;
mod end_to_end;
