mod concurrency;
mod scenarios;
