use crate::domain::payment_method::BillingAddressCollectionMode;

/// Address component a country expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressUnit {
    Street,
    City,
    State,
    Postcode,
}

/// Which address units a country uses, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpecification {
    pub units: Vec<AddressUnit>,
}

impl AddressSpecification {
    pub fn for_country(country_code: &str) -> Self {
        use AddressUnit::*;
        let units = match country_code.to_ascii_uppercase().as_str() {
            "US" | "CA" | "AU" | "BR" | "MX" | "IN" => vec![Street, City, State, Postcode],
            "GB" | "IE" | "NZ" => vec![Street, City, Postcode],
            "DE" | "FR" | "ES" | "IT" | "NL" | "BE" | "AT" | "CH" | "PL" | "PT" | "SE" | "DK"
            | "NO" | "FI" => vec![Street, Postcode, City],
            "HK" | "AE" => vec![Street, City],
            _ => vec![Street, City, State, Postcode],
        };
        Self { units }
    }

    pub fn contains(&self, unit: AddressUnit) -> bool {
        self.units.contains(&unit)
    }
}

/// Countries for which automatic collection asks for the postal code.
const POSTCODE_REQUIRED_COUNTRIES: &[&str] = &["US", "GB", "CA"];

/// Address units to collect (all of them required) for a country under the
/// given collection mode. The country itself is collected in every mode but
/// `never`.
pub fn collected_units(mode: BillingAddressCollectionMode, country_code: &str) -> Vec<AddressUnit> {
    match mode {
        BillingAddressCollectionMode::Never => Vec::new(),
        BillingAddressCollectionMode::Automatic => {
            let country = country_code.to_ascii_uppercase();
            if POSTCODE_REQUIRED_COUNTRIES.contains(&country.as_str()) {
                vec![AddressUnit::Postcode]
            } else {
                Vec::new()
            }
        }
        BillingAddressCollectionMode::Full => AddressSpecification::for_country(country_code).units,
    }
}
