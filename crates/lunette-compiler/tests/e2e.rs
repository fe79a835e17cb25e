mod e2e {
    mod helpers;
    mod test_errors;
    mod test_statements;
    mod test_versions;
}
