// Every test here runs real handshakes over the loopback on a current-thread
// runtime, the same way the benchmark does.

mod driver_runs;
mod endpoint_pairs;
