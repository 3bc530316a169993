/// Converts a 1-based column number to its letter form (1 -> A, 27 -> AA).
pub fn column_number_to_name(column: u32) -> String {
    let mut column = column;
    let mut name = String::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        name.insert(0, (b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    name
}

/// Quotes a sheet name for use in an address, doubling embedded quotes.
pub fn quote_sheet_name(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

/// Single-column range on a sheet, e.g. `'Sales'!B2:B5`.
pub fn column_range_address(sheet: &str, column: u32, start_row: u32, end_row: u32) -> String {
    let letter = column_number_to_name(column);
    format!(
        "{}!{letter}{start_row}:{letter}{end_row}",
        quote_sheet_name(sheet)
    )
}
