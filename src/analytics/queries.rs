//! SQL behind the builtin metric providers.
//!
//! Dynamic queries carry a `{where}` placeholder filled in by the filter
//! builder; every filterable query anchors the bookings table on alias `b` so
//! one set of filter clauses works everywhere.

/// MIN/MAX booking date, used to default an absent date range.
pub const DATE_RANGE_SQL: &str = "SELECT MIN(date_of_booking), MAX(date_of_booking) FROM bookings";

pub const TOTAL_RESERVATIONS_SQL: &str = "SELECT COUNT(*) FROM bookings b {where}";

/// Most recent bookings with client/product/event/payment context.
pub const BOOKINGS_SQL: &str = "
    SELECT
        b.id,
        b.date_of_booking,
        c.id,
        c.name,
        pr.name,
        e.name,
        co.name,
        e.location,
        COALESCE(p.amount, 0),
        p.payment_method,
        p.status
    FROM bookings b
    LEFT JOIN clients c ON c.id = b.client_id
    LEFT JOIN products pr ON pr.id = b.product_id
    LEFT JOIN events e ON e.id = pr.event_id
    LEFT JOIN companies co ON co.id = b.company_id
    LEFT JOIN payments p ON p.booking_id = b.id
    {where}
    ORDER BY b.date_of_booking DESC
    LIMIT 50";

/// Per-day successful revenue and distinct paying users.
pub const ARPU_DAILY_SQL: &str = "
    SELECT
        b.date_of_booking,
        COALESCE(SUM(p.amount), 0),
        COUNT(DISTINCT b.client_id)
    FROM bookings b
    LEFT JOIN payments p ON p.booking_id = b.id AND p.status = 'success'
    {where}
    GROUP BY b.date_of_booking
    ORDER BY b.date_of_booking";

pub const DAILY_REVENUE_SQL: &str = "
    SELECT
        b.date_of_booking,
        COALESCE(SUM(p.amount), 0)
    FROM bookings b
    LEFT JOIN payments p ON p.booking_id = b.id AND p.status = 'success'
    {where}
    GROUP BY b.date_of_booking
    ORDER BY b.date_of_booking";

pub const NET_REVENUE_BY_EVENT_SQL: &str = "
    SELECT
        e.id,
        e.name,
        COALESCE(SUM(p.amount), 0) AS revenue
    FROM bookings b
    JOIN products pr ON pr.id = b.product_id
    JOIN events e ON e.id = pr.event_id
    LEFT JOIN payments p ON p.booking_id = b.id AND p.status = 'success'
    {where}
    GROUP BY e.id, e.name
    ORDER BY revenue DESC";

pub const TOP_PRODUCTS_SQL: &str = "
    SELECT
        pr.id,
        pr.name,
        COALESCE(SUM(p.amount), 0) AS revenue
    FROM bookings b
    JOIN products pr ON pr.id = b.product_id
    LEFT JOIN payments p ON p.booking_id = b.id AND p.status = 'success'
    {where}
    GROUP BY pr.id, pr.name
    ORDER BY revenue DESC
    LIMIT 10";

/// Distinct (client, booking month) pairs; cohort math happens in Rust.
pub const COHORT_ACTIVITY_SQL: &str = "
    SELECT DISTINCT
        b.client_id,
        substr(b.date_of_booking, 1, 7) AS month
    FROM bookings b
    {where}
    ORDER BY b.client_id, month";

// Filter metadata for the dashboard filter sections.
pub const FILTER_EVENTS_SQL: &str = "SELECT id, name FROM events ORDER BY name";
pub const FILTER_COMPANIES_SQL: &str = "SELECT id, name FROM companies ORDER BY name";
pub const FILTER_PRODUCTS_SQL: &str = "SELECT id, name FROM products ORDER BY name";
pub const FILTER_PAYMENT_METHODS_SQL: &str = "
    SELECT DISTINCT LOWER(TRIM(payment_method)) FROM payments
    WHERE payment_method IS NOT NULL
    ORDER BY 1";
pub const FILTER_LOCATIONS_SQL: &str = "
    SELECT DISTINCT location FROM events
    WHERE location IS NOT NULL
    ORDER BY location";
