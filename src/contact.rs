use serde::Serialize;

/// Name assigned when no name-like column carries a value.
pub const UNKNOWN_CONTACT: &str = "Unknown Contact";

/// One CSV row keyed by its (normalized) header names, in column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zip headers against values; extra values are dropped and missing
    /// trailing values become empty strings.
    pub fn from_row<H, V>(headers: &[H], values: &[V]) -> Self
    where
        H: AsRef<str>,
        V: AsRef<str>,
    {
        let fields = headers
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let value = values.get(i).map(|v| v.as_ref()).unwrap_or_default();
                (h.as_ref().to_string(), value.to_string())
            })
            .collect();
        Self { fields }
    }

    pub fn insert(&mut self, header: impl Into<String>, value: impl Into<String>) {
        self.fields.push((header.into(), value.into()));
    }

    /// Value of the first column named `header`.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    /// Number of columns holding a non-blank value.
    pub fn populated(&self) -> usize {
        self.fields
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .count()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }
}

/// Canonical contact. `original` is kept for diagnostics only: it is not
/// serialized and takes no part in equality.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub zip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
    #[serde(skip)]
    original: RawRecord,
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.email == other.email
            && self.phone == other.phone
            && self.company == other.company
            && self.address == other.address
            && self.city == other.city
            && self.state == other.state
            && self.country == other.country
            && self.zip == other.zip
            && self.balance == other.balance
    }
}

impl Eq for Contact {}

impl Contact {
    /// The row this contact was built from.
    pub fn original(&self) -> &RawRecord {
        &self.original
    }

    /// At least one of name (other than the placeholder), email, phone or
    /// company must be present for the contact to be served.
    pub fn is_meaningful(&self) -> bool {
        (!self.name.is_empty() && self.name != UNKNOWN_CONTACT)
            || !self.email.is_empty()
            || !self.phone.is_empty()
            || !self.company.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Name,
    FirstName,
    LastName,
    Email,
    Phone,
    Company,
    Address,
    City,
    State,
    Country,
    Zip,
    Balance,
}

/// Canonical field -> accepted header spellings, highest priority first.
/// Headers reach this table already normalized (spaces collapsed to `_`),
/// the spaced spellings cover records built by hand.
const ALIASES: &[(Field, &[&str])] = &[
    (Field::Id, &["id", "ID", "Id", "contact_id", "Contact_ID", "Contact_id"]),
    (
        Field::Name,
        &[
            "Name",
            "name",
            "Full_name",
            "Full name",
            "full_name",
            "Contact_name",
            "Contact name",
            "contact_name",
            "Customer_name",
            "Customer name",
        ],
    ),
    (Field::FirstName, &["First_name", "First name", "first_name", "FirstName"]),
    (Field::LastName, &["Last_name", "Last name", "last_name", "LastName"]),
    (
        Field::Email,
        &[
            "Email",
            "email",
            "E-mail",
            "e-mail",
            "Email_address",
            "Email address",
            "email_address",
            "Email_Address",
        ],
    ),
    (
        Field::Phone,
        &[
            "Phone",
            "phone",
            "Phone_number",
            "Phone number",
            "phone_number",
            "Mobile",
            "mobile",
            "Telephone",
            "telephone",
        ],
    ),
    (
        Field::Company,
        &[
            "Company_name",
            "Company name",
            "company",
            "organisation",
            "Company",
            "Organisation",
            "organization",
            "Organization",
        ],
    ),
    (
        Field::Address,
        &["Address", "address", "Street", "street", "Street_address", "street_address"],
    ),
    (Field::City, &["City", "city", "Town", "town"]),
    (Field::State, &["State", "state", "Province", "province", "Region", "region", "County"]),
    (Field::Country, &["Country", "country"]),
    (
        Field::Zip,
        &[
            "Zip", "zip", "ZIP", "Zip_code", "zip_code", "Postal", "Postcode", "postcode",
            "postal_code", "Postal_code",
        ],
    ),
    (Field::Balance, &["Balance", "balance", "Account_balance", "account_balance"]),
];

const IDENTIFYING: [Field; 4] = [Field::Name, Field::Email, Field::Phone, Field::Company];

fn aliases(field: Field) -> &'static [&'static str] {
    ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, a)| *a)
        .unwrap_or_default()
}

/// First alias of `field` holding a non-blank value, trimmed.
fn resolve<'r>(record: &'r RawRecord, field: Field) -> Option<&'r str> {
    aliases(field)
        .iter()
        .filter_map(|alias| record.get(alias))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// First non-blank value of `field`, exactly as it appeared in the row.
fn resolve_verbatim<'r>(record: &'r RawRecord, field: Field) -> Option<&'r str> {
    aliases(field)
        .iter()
        .filter_map(|alias| record.get(alias))
        .find(|v| !v.trim().is_empty())
}

fn resolve_owned(record: &RawRecord, field: Field) -> String {
    resolve(record, field).unwrap_or_default().to_string()
}

/// Does the row carry a name, email, phone or company under any known alias?
pub fn has_identifying_field(record: &RawRecord) -> bool {
    IDENTIFYING.iter().any(|f| resolve(record, *f).is_some())
}

/// Trim a header and collapse internal whitespace runs to `_`.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// `(XXX) XXX-XXXX` when exactly ten digits remain after stripping
/// everything else; any other input is returned as-is.
pub fn format_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..])
    } else {
        raw.to_string()
    }
}

fn normalize_balance(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
        .collect();
    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(cleaned),
        _ => {
            tracing::debug!(balance = raw, "dropping unusable balance");
            None
        }
    }
}

fn derive_id(name: &str, email: &str) -> String {
    format!("{name}_{email}")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Map a raw row onto the canonical contact shape. Never fails; a row with
/// nothing recognizable yields a contact named [`UNKNOWN_CONTACT`].
pub fn normalize(record: &RawRecord) -> Contact {
    let name = match resolve(record, Field::Name) {
        Some(n) => n.to_string(),
        None => {
            let first = resolve(record, Field::FirstName).unwrap_or_default();
            let last = resolve(record, Field::LastName).unwrap_or_default();
            let joined = format!("{first} {last}").trim().to_string();
            if joined.is_empty() {
                UNKNOWN_CONTACT.to_string()
            } else {
                joined
            }
        }
    };
    let email = resolve_owned(record, Field::Email);
    let id = match resolve(record, Field::Id) {
        Some(id) => id.to_string(),
        None => derive_id(&name, &email),
    };

    Contact {
        id,
        phone: resolve_verbatim(record, Field::Phone)
            .map(format_phone)
            .unwrap_or_default(),
        company: resolve_owned(record, Field::Company),
        address: resolve_owned(record, Field::Address),
        city: resolve_owned(record, Field::City),
        state: resolve_owned(record, Field::State),
        country: resolve_owned(record, Field::Country),
        zip: resolve_owned(record, Field::Zip),
        balance: resolve(record, Field::Balance).and_then(normalize_balance),
        name,
        email,
        original: record.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let mut r = RawRecord::new();
        for (h, v) in pairs {
            r.insert(*h, *v);
        }
        r
    }

    #[test]
    fn ten_digit_phones_are_formatted() {
        for raw in ["5551234567", "555-123-4567", "(555) 123 4567", "555.123.4567"] {
            assert_eq!(format_phone(raw), "(555) 123-4567", "input {raw}");
        }
    }

    #[test]
    fn other_phone_lengths_are_untouched() {
        for raw in ["", "12345", "+1 555 123 4567", "555-1234", "ext. 12", "  55512345678 "] {
            assert_eq!(format_phone(raw), raw);
        }
    }

    #[test]
    fn unformattable_phone_keeps_surrounding_whitespace() {
        let c = normalize(&record(&[("Name", "A"), ("Phone", " 12345 ")]));
        assert_eq!(c.phone, " 12345 ");
        let c = normalize(&record(&[("Name", "A"), ("Phone", " 555-123-4567 ")]));
        assert_eq!(c.phone, "(555) 123-4567");
        let c = normalize(&record(&[("Name", "A"), ("phone", "   "), ("Mobile", "77")]));
        assert_eq!(c.phone, "77");
    }

    #[test]
    fn company_alias_priority() {
        let r = record(&[
            ("Company", "Last"),
            ("organisation", "Fourth"),
            ("company", "Third"),
            ("Company_name", ""),
        ]);
        assert_eq!(normalize(&r).company, "Third");

        let r = record(&[("Company", "Acme"), ("Company_name", "Acme Holdings")]);
        assert_eq!(normalize(&r).company, "Acme Holdings");
    }

    #[test]
    fn id_derived_from_name_and_email() {
        let c = normalize(&record(&[("Name", "John Doe"), ("Email", "john@x.com")]));
        assert_eq!(c.id, "John_Doe_john@x.com");
        assert_eq!(c.phone, "");
        assert_eq!(c.balance, None);

        let c = normalize(&record(&[("id", "c-42"), ("Name", "John Doe")]));
        assert_eq!(c.id, "c-42");
    }

    #[test]
    fn name_falls_back_to_first_and_last() {
        let c = normalize(&record(&[("First_name", "Ada"), ("Last_name", "Lovelace")]));
        assert_eq!(c.name, "Ada Lovelace");

        let c = normalize(&record(&[("City", "Paris")]));
        assert_eq!(c.name, UNKNOWN_CONTACT);
        assert!(!c.is_meaningful());
    }

    #[test]
    fn balance_is_cleaned_and_non_negative() {
        let c = normalize(&record(&[("Name", "A"), ("Balance", "$1,250.50")]));
        assert_eq!(c.balance.as_deref(), Some("1250.50"));
        let c = normalize(&record(&[("Name", "A"), ("Balance", "-3")]));
        assert_eq!(c.balance, None);
        let c = normalize(&record(&[("Name", "A"), ("Balance", "n/a")]));
        assert_eq!(c.balance, None);
    }

    #[test]
    fn headers_collapse_whitespace() {
        assert_eq!(normalize_header("  Company   name "), "Company_name");
        assert_eq!(normalize_header("\u{feff}Name"), "Name");
        assert_eq!(normalize_header("Email"), "Email");
    }

    #[test]
    fn original_is_kept_but_ignored_by_equality() {
        let a = normalize(&record(&[("Name", "Bo"), ("Email", "bo@x.com"), ("Extra", "1")]));
        let b = normalize(&record(&[("name", "Bo"), ("email", "bo@x.com")]));
        assert_eq!(a, b);
        assert_eq!(a.original().get("Extra"), Some("1"));
        let json = serde_json::to_value(&a).unwrap();
        assert!(json.get("original").is_none());
    }

    #[test]
    fn identifying_fields() {
        assert!(has_identifying_field(&record(&[("organisation", "Acme")])));
        assert!(!has_identifying_field(&record(&[("City", "Oslo"), ("Zip", "0150")])));
        assert!(!has_identifying_field(&record(&[("Name", "   ")])));
    }
}
