// Test modules for Forum Chat
// Each module covers the corresponding source module; helpers holds the
// in-memory broker and history source shared by the async tests

mod helpers;

mod router_tests;
