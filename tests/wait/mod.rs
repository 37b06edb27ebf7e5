mod exit_tests;
mod health_tests;
mod host_port_tests;
mod sql_tests;
mod tls_tests;
