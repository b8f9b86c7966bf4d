pub type Endpoint = str;

pub const LOGIN: &Endpoint = "/je-me-connecte";
pub const LOGOUT: &Endpoint = "/je-me-deconnecte";
pub const DASHBOARD: &Endpoint = "/tableau-de-bord";
pub const CONTRACTS: &Endpoint = "/donnees-contrats";
pub const DAILY_DATA: &Endpoint = "/statJData";
pub const MONTHLY_DATA: &Endpoint = "/statMData";
